// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! P4Runtime client side of the infra manager: the single control session to the device
//! (connection, handshake and primary/backup arbitration), forwarding pipeline management and
//! the programming of the forwarding rules that steer traffic to endpoints.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![allow(clippy::missing_errors_doc)]

pub mod arbitration;
pub mod cni;
pub mod error;
pub mod pipeline;
pub mod session;

/// Types and stubs generated from the P4Runtime protocol definition.
#[allow(clippy::all, clippy::pedantic, unreachable_pub)]
pub mod proto {
    pub mod google {
        pub mod rpc {
            tonic::include_proto!("google.rpc");
        }
    }
    pub mod p4 {
        pub mod v1 {
            tonic::include_proto!("p4.v1");
        }
    }
    pub use p4::v1::*;
}

pub use arbitration::{ElectionId, Role};
pub use cni::{P4CniProgrammer, RuleProgrammer};
pub use error::{DataplaneError, SessionError};
pub use pipeline::{FwdPipeConfig, ResponseType};
pub use session::{SessionManager, SessionOptions, SessionState};

use tracectl::trace_target;
trace_target!("p4rt", LevelFilter::INFO, &["session", "dataplane"]);
