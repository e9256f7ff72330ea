// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The `InfraAgent` service.
//!
//! Only the endpoint calls act on the dataplane. Everything else the agents send us is
//! acknowledged and logged.

use std::fmt::Debug;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{error, info};

use crate::proto::infra_agent_server::InfraAgent;
use crate::proto::{
    ActivePolicyRemove, ActivePolicyUpdate, ActiveProfileRemove, ActiveProfileUpdate,
    AddDelSnatPrefixRequest, AddReply, CreateNetworkRequest, DelReply, DeleteNetworkRequest,
    GlobalBgpConfigUpdate, HostEndpointRemove, HostEndpointUpdate, HostMetadataRemove,
    HostMetadataUpdate, IpSetDeltaUpdate, IpSetRemove, IpSetUpdate, IpamPoolRemove,
    IpamPoolUpdate, NamespaceRemove, NamespaceUpdate, NatTranslation, Reply, RouteRemove,
    RouteUpdate, ServiceAccountRemove, ServiceAccountUpdate, SetSnatAddressRequest,
    SetupHostInterfaceRequest, VxlanTunnelEndpointRemove, VxlanTunnelEndpointUpdate,
    WireguardEndpointRemove, WireguardEndpointUpdate, WorkloadEndpointRemove,
    WorkloadEndpointUpdate,
};
use crate::provision::{ProvisionEngine, ProvisionError, RequestContext};
use net::{InterfaceKind, Mac, ParseError, address_from_cidr, port_from_ifname};

/// The fields every endpoint request carries, parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EndpointFields {
    mac: Mac,
    ip: IpAddr,
}

fn parse_fields(mac: &str, cidr: Option<&str>) -> Result<EndpointFields, ParseError> {
    let ip = address_from_cidr(cidr.ok_or(ParseError::MissingAddress)?)?;
    let mac = mac.trim().parse()?;
    Ok(EndpointFields { mac, ip })
}

fn accepted<T: Debug>(rpc: &str, request: &Request<T>) -> Result<Response<Reply>, Status> {
    info!("Incoming {rpc} request {:?}", request.get_ref());
    Ok(Response::new(Reply {
        successful: true,
        error_message: String::new(),
    }))
}

pub struct InfraAgentService {
    engine: Arc<ProvisionEngine>,
    request_timeout: Option<Duration>,
}

impl InfraAgentService {
    #[must_use]
    pub fn new(engine: Arc<ProvisionEngine>, request_timeout: Option<Duration>) -> Self {
        Self {
            engine,
            request_timeout,
        }
    }

    fn context(&self) -> RequestContext {
        let ctx = RequestContext::new(CancellationToken::new());
        match self.request_timeout {
            Some(timeout) => ctx.with_deadline(Instant::now() + timeout),
            None => ctx,
        }
    }

    /// Run a provisioning flow in its own task.
    ///
    /// If the caller goes away the flow is cancelled, which it only honors before its first
    /// mutation; once the dataplane has been touched it runs to completion regardless.
    async fn run<F, Fut>(&self, flow: F) -> Result<(), Status>
    where
        F: FnOnce(Arc<ProvisionEngine>, RequestContext) -> Fut,
        Fut: Future<Output = Result<(), ProvisionError>> + Send + 'static,
    {
        let ctx = self.context();
        let _cancel_on_drop = ctx.token().clone().drop_guard();
        match tokio::spawn(flow(self.engine.clone(), ctx)).await {
            Ok(result) => result.map_err(Status::from),
            Err(e) => {
                error!("Provisioning task failed: {e}");
                Err(Status::internal(format!("provisioning task failed: {e}")))
            }
        }
    }
}

#[tonic::async_trait]
impl InfraAgent for InfraAgentService {
    async fn create_network(
        &self,
        request: Request<CreateNetworkRequest>,
    ) -> Result<Response<AddReply>, Status> {
        let request = request.into_inner();
        info!("Incoming Add request {request:?}");
        let add = request.add_request.unwrap_or_default();
        let cidr = add.container_ips.first().map(|c| c.address.as_str());
        let fields = parse_fields(&request.mac_addr, cidr).map_err(ProvisionError::from)?;
        let port = port_from_ifname(&request.host_if_name).map_err(ProvisionError::from)?;

        let EndpointFields { mac, ip } = fields;
        self.run(move |engine, ctx| async move {
            engine
                .provision_endpoint(&ctx, InterfaceKind::Endpoint, mac, ip, port)
                .await
        })
        .await?;
        Ok(Response::new(AddReply {
            successful: true,
            host_interface_name: add.desired_host_interface_name,
            ..Default::default()
        }))
    }

    async fn delete_network(
        &self,
        request: Request<DeleteNetworkRequest>,
    ) -> Result<Response<DelReply>, Status> {
        let request = request.into_inner();
        info!("Incoming Del request {request:?}");
        let EndpointFields { mac, ip } = parse_fields(&request.mac_addr, Some(&request.ipv4_addr))
            .map_err(ProvisionError::from)?;

        self.run(move |engine, ctx| async move {
            engine
                .deprovision_endpoint(&ctx, InterfaceKind::Endpoint, mac, ip)
                .await
        })
        .await?;
        Ok(Response::new(DelReply {
            successful: true,
            error_message: String::new(),
        }))
    }

    async fn setup_host_interface(
        &self,
        request: Request<SetupHostInterfaceRequest>,
    ) -> Result<Response<Reply>, Status> {
        let request = request.into_inner();
        info!("Incoming SetupHostInterface request {request:?}");
        let EndpointFields { mac, ip } = parse_fields(&request.mac_addr, Some(&request.ipv4_addr))
            .map_err(ProvisionError::from)?;
        let port = port_from_ifname(&request.if_name).map_err(ProvisionError::from)?;

        self.run(move |engine, ctx| async move {
            engine
                .provision_endpoint(&ctx, InterfaceKind::Host, mac, ip, port)
                .await
        })
        .await?;
        Ok(Response::new(Reply {
            successful: true,
            error_message: String::new(),
        }))
    }

    async fn set_snat_address(
        &self,
        request: Request<SetSnatAddressRequest>,
    ) -> Result<Response<Reply>, Status> {
        accepted("SetSnatAddress", &request)
    }

    async fn nat_translation_add(
        &self,
        request: Request<NatTranslation>,
    ) -> Result<Response<Reply>, Status> {
        accepted("NatTranslationAdd", &request)
    }

    async fn nat_translation_delete(
        &self,
        request: Request<NatTranslation>,
    ) -> Result<Response<Reply>, Status> {
        accepted("NatTranslationDelete", &request)
    }

    async fn add_del_snat_prefix(
        &self,
        request: Request<AddDelSnatPrefixRequest>,
    ) -> Result<Response<Reply>, Status> {
        accepted("AddDelSnatPrefix", &request)
    }

    async fn active_policy_update(
        &self,
        request: Request<ActivePolicyUpdate>,
    ) -> Result<Response<Reply>, Status> {
        accepted("ActivePolicyUpdate", &request)
    }

    async fn active_policy_remove(
        &self,
        request: Request<ActivePolicyRemove>,
    ) -> Result<Response<Reply>, Status> {
        accepted("ActivePolicyRemove", &request)
    }

    async fn update_ip_set(
        &self,
        request: Request<IpSetUpdate>,
    ) -> Result<Response<Reply>, Status> {
        accepted("UpdateIPSet", &request)
    }

    async fn update_ip_set_delta(
        &self,
        request: Request<IpSetDeltaUpdate>,
    ) -> Result<Response<Reply>, Status> {
        accepted("UpdateIPSetDelta", &request)
    }

    async fn remove_ip_set(
        &self,
        request: Request<IpSetRemove>,
    ) -> Result<Response<Reply>, Status> {
        accepted("RemoveIPSet", &request)
    }

    async fn update_active_profile(
        &self,
        request: Request<ActiveProfileUpdate>,
    ) -> Result<Response<Reply>, Status> {
        accepted("UpdateActiveProfile", &request)
    }

    async fn remove_active_profile(
        &self,
        request: Request<ActiveProfileRemove>,
    ) -> Result<Response<Reply>, Status> {
        accepted("RemoveActiveProfile", &request)
    }

    async fn update_host_endpoint(
        &self,
        request: Request<HostEndpointUpdate>,
    ) -> Result<Response<Reply>, Status> {
        accepted("UpdateHostEndpoint", &request)
    }

    async fn remove_host_endpoint(
        &self,
        request: Request<HostEndpointRemove>,
    ) -> Result<Response<Reply>, Status> {
        accepted("RemoveHostEndpoint", &request)
    }

    async fn update_local_endpoint(
        &self,
        request: Request<WorkloadEndpointUpdate>,
    ) -> Result<Response<Reply>, Status> {
        accepted("UpdateLocalEndpoint", &request)
    }

    async fn remove_local_endpoint(
        &self,
        request: Request<WorkloadEndpointRemove>,
    ) -> Result<Response<Reply>, Status> {
        accepted("RemoveLocalEndpoint", &request)
    }

    async fn update_host_meta_data(
        &self,
        request: Request<HostMetadataUpdate>,
    ) -> Result<Response<Reply>, Status> {
        accepted("UpdateHostMetaData", &request)
    }

    async fn remove_host_meta_data(
        &self,
        request: Request<HostMetadataRemove>,
    ) -> Result<Response<Reply>, Status> {
        accepted("RemoveHostMetaData", &request)
    }

    async fn update_ipam_pool(
        &self,
        request: Request<IpamPoolUpdate>,
    ) -> Result<Response<Reply>, Status> {
        accepted("UpdateIPAMPool", &request)
    }

    async fn remove_ipam_pool(
        &self,
        request: Request<IpamPoolRemove>,
    ) -> Result<Response<Reply>, Status> {
        accepted("RemoveIPAMPool", &request)
    }

    async fn update_service_account(
        &self,
        request: Request<ServiceAccountUpdate>,
    ) -> Result<Response<Reply>, Status> {
        accepted("UpdateServiceAccount", &request)
    }

    async fn remove_service_account(
        &self,
        request: Request<ServiceAccountRemove>,
    ) -> Result<Response<Reply>, Status> {
        accepted("RemoveServiceAccount", &request)
    }

    async fn update_namespace(
        &self,
        request: Request<NamespaceUpdate>,
    ) -> Result<Response<Reply>, Status> {
        accepted("UpdateNamespace", &request)
    }

    async fn remove_namespace(
        &self,
        request: Request<NamespaceRemove>,
    ) -> Result<Response<Reply>, Status> {
        accepted("RemoveNamespace", &request)
    }

    async fn update_route(
        &self,
        request: Request<RouteUpdate>,
    ) -> Result<Response<Reply>, Status> {
        accepted("UpdateRoute", &request)
    }

    async fn remove_route(
        &self,
        request: Request<RouteRemove>,
    ) -> Result<Response<Reply>, Status> {
        accepted("RemoveRoute", &request)
    }

    async fn update_vxlan_tunnel_endpoint(
        &self,
        request: Request<VxlanTunnelEndpointUpdate>,
    ) -> Result<Response<Reply>, Status> {
        accepted("UpdateVXLANTunnelEndpoint", &request)
    }

    async fn remove_vxlan_tunnel_endpoint(
        &self,
        request: Request<VxlanTunnelEndpointRemove>,
    ) -> Result<Response<Reply>, Status> {
        accepted("RemoveVXLANTunnelEndpoint", &request)
    }

    async fn update_wireguard_endpoint(
        &self,
        request: Request<WireguardEndpointUpdate>,
    ) -> Result<Response<Reply>, Status> {
        accepted("UpdateWireguardEndpoint", &request)
    }

    async fn remove_wireguard_endpoint(
        &self,
        request: Request<WireguardEndpointRemove>,
    ) -> Result<Response<Reply>, Status> {
        accepted("RemoveWireguardEndpoint", &request)
    }

    async fn update_global_bgp_config(
        &self,
        request: Request<GlobalBgpConfigUpdate>,
    ) -> Result<Response<Reply>, Status> {
        accepted("UpdateGlobalBGPConfig", &request)
    }
}
