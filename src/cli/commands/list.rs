//! List command implementation for loopcast
//!
//! Discovers and displays available DLNA renderers on the network.

use crate::{devices::discovery::discover_once, error::Result};
use log::info;

/// List command implementation
pub struct ListCommand<'a> {
    args: &'a super::super::List,
}

impl<'a> ListCommand<'a> {
    /// Create a new list command
    pub fn new(args: &'a super::super::List) -> Self {
        Self { args }
    }

    /// Execute the list command
    pub async fn run(&self) -> Result<()> {
        info!("Discovering renderers for {} seconds", self.args.timeout);
        for description in discover_once(self.args.timeout).await? {
            println!(
                "[{}] {} @ {}",
                description.renderer_id, description.friendly_name, description.location
            );
        }
        Ok(())
    }
}
