//! Console Commands

use anyhow::{anyhow, Result};
use clap::Parser;
use pvetui_common::{AuthSession, ConsoleTarget, ConsoleTicket, Error, GuestKind};
use pvetui_console::{
    classify, BridgeError, BridgeOptions, ConsoleNegotiator, StdioEvents, TerminalBridge,
    TerminalModeManager,
};
use tracing::{debug, info};

use super::Context;
use crate::client::ApiClient;
use crate::output::{print_info, print_warning};

#[derive(Parser)]
pub struct ConsoleArgs {
    /// Guest ID
    pub vmid: u32,

    /// Node hosting the guest (looked up with the API token when omitted)
    #[arg(long)]
    pub node: Option<String>,

    /// Guest type: vm or ct (looked up with the API token when omitted)
    #[arg(long)]
    pub kind: Option<GuestKind>,
}

/// Where to connect, plus an optional display name
struct Resolved {
    target: ConsoleTarget,
    name: Option<String>,
}

pub async fn execute(args: ConsoleArgs, ctx: &Context) -> Result<()> {
    ctx.config.validate_for_console()?;
    let resolved = resolve(&args, ctx).await?;
    let target = resolved.target;

    let negotiator = ConsoleNegotiator::new(ctx.endpoint()?, ctx.session_store())?;
    let (session, ticket) = match negotiate(&negotiator, &target).await {
        Err(e) if e.is_recoverable_by_login() => {
            debug!("No usable session ({}); logging in", e);
            ctx.login().await?;
            negotiate(&negotiator, &target).await?
        }
        other => other?,
    };

    let mut descriptor = negotiator.build_connection_descriptor(&target, &ticket, &session);
    if let Some(name) = resolved.name {
        descriptor.title_hint = format!("{} ({})", name, target);
    }

    info!("Opening console for {}", target);
    let bridge = TerminalBridge::new(
        TerminalModeManager::new(),
        StdioEvents::new(),
        tokio::io::stdout(),
        BridgeOptions {
            insecure: ctx.config.server.insecure,
            ..BridgeOptions::default()
        },
    );

    match bridge.run(&descriptor).await {
        Ok(()) => {
            print_info(&format!("\r\nConsole for {} closed", target));
            Ok(())
        }
        Err(e) => Err(bridge_failure(e)),
    }
}

async fn negotiate(
    negotiator: &ConsoleNegotiator,
    target: &ConsoleTarget,
) -> pvetui_common::Result<(AuthSession, ConsoleTicket)> {
    let session = negotiator.ensure_session()?;
    let ticket = negotiator.request_ticket(target, &session).await?;
    Ok((session, ticket))
}

/// Fill in node and kind from the cluster when not given
async fn resolve(args: &ConsoleArgs, ctx: &Context) -> Result<Resolved> {
    if let (Some(node), Some(kind)) = (&args.node, args.kind) {
        return Ok(Resolved {
            target: ConsoleTarget::new(kind, node.clone(), args.vmid),
            name: None,
        });
    }

    let client = ApiClient::new(&ctx.config).map_err(|e| {
        anyhow!(
            "{}; pass --node and --kind to open a console without an API token",
            e
        )
    })?;
    let guest = client
        .find_guest(args.vmid)
        .await?
        .ok_or_else(|| anyhow!("Guest {} not found", args.vmid))?;
    let discovered = guest
        .target()
        .ok_or_else(|| anyhow!("Guest {} has unsupported type {}", args.vmid, guest.kind))?;

    if let Some(kind) = args.kind {
        if kind != discovered.kind {
            print_warning(&format!(
                "Guest {} is a {}, not a {}",
                args.vmid, discovered.kind, kind
            ));
        }
    }

    Ok(Resolved {
        target: ConsoleTarget::new(
            discovered.kind,
            args.node.clone().unwrap_or(discovered.node),
            args.vmid,
        ),
        name: guest.name,
    })
}

/// Turn a bridge error into a user-facing message
fn bridge_failure(err: BridgeError) -> anyhow::Error {
    match err {
        // Transport failures from the session layer carry raw text
        BridgeError::State(Error::Network(raw)) => anyhow!("{}", classify(&raw)),
        other => anyhow!("{} [{}]", other, other.category()),
    }
}
