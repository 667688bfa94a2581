//! Server-side request execution
//!
//! Every request yields exactly one response with the request's id: either
//! the success response or an error response describing the rejection.

use greenhouse_core::{
    ClientAddress, Error as CoreError, KeyPair, Request, RequestMessage, Response, ResponseMessage,
};
use greenhouse_transport::Channel;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{HubError, Result};
use crate::hub::CentralHub;
use crate::proxy::{ClientAgent, ClientKind};

/// Everything a request may touch while executing
pub struct RequestContext<'a> {
    pub hub: &'a CentralHub,
    pub agent: Arc<dyn ClientAgent>,
    pub channel: &'a Channel,
}

impl RequestContext<'_> {
    fn registered(&self) -> Result<(ClientAddress, ClientKind)> {
        self.hub
            .client_of(self.agent.connection_id())
            .ok_or_else(|| HubError::Authentication("client is not registered".into()))
    }

    fn control_panel(&self) -> Result<ClientAddress> {
        match self.registered()? {
            (address, ClientKind::ControlPanel) => Ok(address),
            (address, ClientKind::FieldNode) => Err(HubError::Authentication(format!(
                "client {} is not a control panel",
                address
            ))),
        }
    }

    fn field_node(&self) -> Result<ClientAddress> {
        match self.registered()? {
            (address, ClientKind::FieldNode) => Ok(address),
            (address, ClientKind::ControlPanel) => Err(HubError::Authentication(format!(
                "client {} is not a field node",
                address
            ))),
        }
    }

    fn peer(&self) -> SocketAddr {
        self.channel.peer_addr()
    }
}

/// Execute one inbound request and build its response
pub async fn execute(ctx: &RequestContext<'_>, msg: &RequestMessage) -> ResponseMessage {
    debug!("{} #{} {}", ctx.peer(), msg.id, msg.request.command());
    let result = match &msg.request {
        Request::RequestPublicKey => offer_public_key(ctx).await,
        request => dispatch(ctx, request),
    };
    let response = result.unwrap_or_else(|e| {
        warn!(
            "Rejected '{}' #{} from {}: {}",
            msg.request.command(),
            msg.id,
            ctx.peer(),
            e
        );
        e.to_response()
    });
    msg.reply(response)
}

fn dispatch(ctx: &RequestContext<'_>, request: &Request) -> Result<Response> {
    match request {
        Request::RegisterFieldNode { fnst, fnsm, name } => {
            let address = ctx.hub.register_field_node(
                ctx.agent.clone(),
                fnst.clone(),
                fnsm.clone(),
                name.clone(),
            )?;
            Ok(Response::FieldNodeRegistered { address })
        }

        Request::RegisterControlPanel {
            compatibility_list,
            data_port,
        } => {
            let data_endpoint = data_port.map(|port| SocketAddr::new(ctx.peer().ip(), port));
            let address = ctx.hub.register_control_panel(
                ctx.agent.clone(),
                compatibility_list.clone(),
                data_endpoint,
            )?;
            Ok(Response::ControlPanelRegistered { address })
        }

        Request::GetFieldNodePool => {
            ctx.registered()?;
            Ok(Response::FieldNodePool {
                pool: ctx.hub.field_node_pool(),
            })
        }

        Request::Subscribe { field_node } => {
            let panel = ctx.control_panel()?;
            let snapshot = ctx.hub.subscribe(panel, *field_node)?;
            Ok(Response::Subscribed {
                field_node: *field_node,
                fnst: snapshot.fnst,
                fnsm: snapshot.fnsm,
                name: snapshot.name,
            })
        }

        Request::Unsubscribe { field_node } => {
            let panel = ctx.control_panel()?;
            ctx.hub.unsubscribe(panel, *field_node)?;
            Ok(Response::Unsubscribed {
                field_node: *field_node,
            })
        }

        Request::ActivateActuator {
            field_node,
            actuator,
            state,
        } => {
            ctx.control_panel()?;
            ctx.hub.activate_actuator(*field_node, *actuator, *state)?;
            Ok(Response::Ok)
        }

        Request::ActuatorNotification { actuator, state } => {
            let node = ctx.field_node()?;
            ctx.hub.actuator_notification(node, *actuator, *state)?;
            Ok(Response::Ok)
        }

        Request::Heartbeat => Ok(Response::Heartbeat),

        Request::ShareSecretKey { secret_key } => {
            ctx.channel
                .with_crypto_state(|c| c.accept_secret_key(secret_key))?;
            Ok(Response::SecretKeyAccepted)
        }

        Request::Disconnect => Ok(Response::Disconnected),

        Request::RequestPublicKey => Err(HubError::Protocol(
            "public key requests are answered asynchronously".into(),
        )),

        Request::ApplyActuatorState { .. }
        | Request::ActuatorState { .. }
        | Request::FieldNodeUnavailable { .. }
        | Request::AdlUpdate { .. } => Err(HubError::Protocol(format!(
            "'{}' is not handled by the hub",
            request.command()
        ))),
    }
}

/// Key generation runs on the blocking pool with no lock held; the crypto
/// lock is only taken to check the state and to install the pair.
async fn offer_public_key(ctx: &RequestContext<'_>) -> Result<Response> {
    let bits = ctx.channel.with_crypto_state(|c| {
        c.ensure_plain()?;
        Ok::<_, CoreError>(c.rsa_bits())
    })?;

    let pair = tokio::task::spawn_blocking(move || KeyPair::generate(bits))
        .await
        .map_err(|e| HubError::Encryption(format!("key generation failed: {}", e)))??;

    let key = ctx.channel.with_crypto_state(|c| c.install_key_pair(pair))?;
    Ok(Response::PublicKey { key })
}
