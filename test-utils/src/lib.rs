// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Testing utilities for the infra manager: an in-process P4Runtime server and stand-ins for
//! the collaborators of the provisioning engine that can be told to fail.

pub mod p4runtime;
pub mod programmer;
pub mod store;

pub use p4runtime::{Arbitration, FakeP4Runtime};
pub use programmer::{FakeProgrammer, ProgrammerCall};
pub use store::FaultyStore;
