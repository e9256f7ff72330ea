// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Forwarding rules that steer traffic to endpoints.
//!
//! Every endpoint gets two entries: one in the MAC table (exact match on the destination MAC)
//! and one in the IPv4 table (a /32 LPM match on the destination address). Both resolve to the
//! same "send to vport" action, with the port as its only parameter. Hosts and pods use
//! distinct actions so that the pipeline can treat host traffic differently.

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{DataplaneError, SessionError};
use crate::proto::{
    Action, Entity, FieldMatch, TableAction, TableEntry, Update, action, entity, field_match,
    table_action, update,
};
use crate::session::SessionManager;
use config::DataplaneConfig;
use net::{InterfaceKind, Mac};

/// Installs and removes the forwarding rules of an endpoint.
#[async_trait]
pub trait RuleProgrammer: Send + Sync {
    /// Install the rules for an endpoint. On error no rule of the endpoint is left behind.
    async fn insert_rules(
        &self,
        kind: InterfaceKind,
        mac: Mac,
        ip: IpAddr,
        port: u32,
    ) -> Result<(), DataplaneError>;

    /// Remove the rules of an endpoint. Rules already absent from the device are not an error.
    /// On error the endpoint keeps both of its rules; `kind` and `port` describe the rules being
    /// removed so that a partial removal can be undone.
    async fn delete_rules(
        &self,
        kind: InterfaceKind,
        mac: Mac,
        ip: IpAddr,
        port: u32,
    ) -> Result<(), DataplaneError>;
}

/// [`RuleProgrammer`] writing table entries over the P4Runtime session.
pub struct P4CniProgrammer {
    session: Arc<SessionManager>,
    ids: DataplaneConfig,
}

/// The action parameter encoding of a port: 4 bytes, network order.
#[must_use]
pub fn port_bytes(port: u32) -> Vec<u8> {
    port.to_be_bytes().to_vec()
}

fn entity_update(kind: update::Type, entry: TableEntry) -> Update {
    Update {
        r#type: kind.into(),
        entity: Some(Entity {
            entity: Some(entity::Entity::TableEntry(entry)),
        }),
    }
}

impl P4CniProgrammer {
    #[must_use]
    pub fn new(session: Arc<SessionManager>, ids: DataplaneConfig) -> Self {
        Self { session, ids }
    }

    fn action_id(&self, kind: InterfaceKind) -> u32 {
        match kind {
            InterfaceKind::Endpoint => self.ids.endpoint_action_id,
            InterfaceKind::Host => self.ids.host_action_id,
        }
    }

    fn set_dest_vport(&self, action_id: u32, port: u32) -> TableAction {
        TableAction {
            r#type: Some(table_action::Type::Action(Action {
                action_id,
                params: vec![action::Param {
                    param_id: self.ids.port_param_id,
                    value: port_bytes(port),
                }],
            })),
        }
    }

    /// MAC table entry. Without an action this is the key used for deletion.
    #[must_use]
    pub fn mac_entry(&self, mac: Mac, action: Option<(u32, u32)>) -> TableEntry {
        TableEntry {
            table_id: self.ids.mac_table_id,
            r#match: vec![FieldMatch {
                field_id: self.ids.mac_match_field_id,
                field_match_type: Some(field_match::FieldMatchType::Exact(field_match::Exact {
                    value: mac.octets().to_vec(),
                })),
            }],
            action: action.map(|(id, port)| self.set_dest_vport(id, port)),
            ..Default::default()
        }
    }

    /// IPv4 table entry, a host route. Without an action this is the key used for deletion.
    #[must_use]
    pub fn ipv4_entry(&self, ip: Ipv4Addr, action: Option<(u32, u32)>) -> TableEntry {
        TableEntry {
            table_id: self.ids.ipv4_table_id,
            r#match: vec![FieldMatch {
                field_id: self.ids.ipv4_match_field_id,
                field_match_type: Some(field_match::FieldMatchType::Lpm(field_match::Lpm {
                    value: ip.octets().to_vec(),
                    prefix_len: 32,
                })),
            }],
            action: action.map(|(id, port)| self.set_dest_vport(id, port)),
            ..Default::default()
        }
    }

    async fn write_one(&self, kind: update::Type, entry: TableEntry) -> Result<(), SessionError> {
        self.session.write(vec![entity_update(kind, entry)]).await
    }

    async fn delete_one(&self, entry: TableEntry, what: &str) -> Result<(), DataplaneError> {
        match self.write_one(update::Type::Delete, entry).await {
            Ok(()) => Ok(()),
            Err(SessionError::Rpc(status)) if status.code() == tonic::Code::NotFound => {
                debug!("{what} entry already absent from the device");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn ipv4_of(ip: IpAddr) -> Result<Ipv4Addr, DataplaneError> {
    match ip {
        IpAddr::V4(v4) => Ok(v4),
        IpAddr::V6(_) => Err(DataplaneError::UnsupportedAddress(ip)),
    }
}

#[async_trait]
impl RuleProgrammer for P4CniProgrammer {
    async fn insert_rules(
        &self,
        kind: InterfaceKind,
        mac: Mac,
        ip: IpAddr,
        port: u32,
    ) -> Result<(), DataplaneError> {
        let v4 = ipv4_of(ip)?;
        if !self.session.is_primary() {
            return Err(if self.session.is_open() {
                DataplaneError::NotPrimary
            } else {
                DataplaneError::NotConnected
            });
        }
        let action = Some((self.action_id(kind), port));

        self.write_one(update::Type::Insert, self.mac_entry(mac, action))
            .await?;
        if let Err(e) = self
            .write_one(update::Type::Insert, self.ipv4_entry(v4, action))
            .await
        {
            warn!("Failed to insert ipv4 entry for {ip}, removing mac entry for {mac}");
            if let Err(undo) = self
                .write_one(update::Type::Delete, self.mac_entry(mac, None))
                .await
            {
                error!("Failed to remove mac entry for {mac}: {undo}");
            }
            return Err(e.into());
        }
        info!("Inserted {kind} rules for {mac} {ip} port {port}");
        Ok(())
    }

    async fn delete_rules(
        &self,
        kind: InterfaceKind,
        mac: Mac,
        ip: IpAddr,
        port: u32,
    ) -> Result<(), DataplaneError> {
        let v4 = ipv4_of(ip)?;
        self.delete_one(self.ipv4_entry(v4, None), "ipv4").await?;
        if let Err(e) = self.delete_one(self.mac_entry(mac, None), "mac").await {
            warn!("Failed to delete mac entry for {mac}, restoring ipv4 entry for {ip}");
            let action = Some((self.action_id(kind), port));
            if let Err(undo) = self
                .write_one(update::Type::Insert, self.ipv4_entry(v4, action))
                .await
            {
                error!("Failed to restore ipv4 entry for {ip}: {undo}");
            }
            return Err(e);
        }
        info!("Deleted rules for {mac} {ip}");
        Ok(())
    }
}
