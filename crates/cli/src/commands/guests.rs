//! Guest listing

use anyhow::Result;

use super::Context;
use crate::client::{ApiClient, Guest};
use crate::output::{print_list, TableDisplay};

impl TableDisplay for Guest {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Type", "Node", "Status"]
    }

    fn row(&self) -> Vec<String> {
        let kind = self
            .target()
            .map(|target| target.kind.to_string())
            .unwrap_or_else(|| self.kind.clone());
        vec![
            self.vmid.to_string(),
            self.name.clone().unwrap_or_default(),
            kind,
            self.node.clone(),
            self.status.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }
}

/// List VMs and containers
pub async fn execute(ctx: &Context) -> Result<()> {
    let client = ApiClient::new(&ctx.config)?;
    let guests = client.list_guests().await?;
    print_list(&guests, ctx.format);
    Ok(())
}
