// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Link-time registry of tracing targets.
//!
//! Every crate of the agent declares its targets with [`trace_target!`](crate::trace_target);
//! third-party crates whose logs we want to tune get a [`custom_target!`](crate::custom_target)
//! in the binary. Each declaration lands in [`TARGETS`] when the binary is linked.

use crate::LevelFilter;

/// A declared target.
#[derive(Debug)]
pub struct TargetDecl {
    /// Target string of the events, a module path unless `external`.
    pub target: &'static str,
    /// Short name usable in a tracing config string.
    pub name: &'static str,
    pub level: LevelFilter,
    pub tags: &'static [&'static str],
    pub external: bool,
}

#[linkme::distributed_slice]
pub static TARGETS: [TargetDecl];

#[doc(hidden)]
#[macro_export]
macro_rules! declare_target {
    ($target:expr, $name:expr, $level:expr, $tags:expr, $external:expr) => {
        const _: () = {
            #[allow(unused_imports)]
            use $crate::LevelFilter;

            #[linkme::distributed_slice($crate::targets::TARGETS)]
            static DECL: $crate::targets::TargetDecl = $crate::targets::TargetDecl {
                target: $target,
                name: $name,
                level: $level,
                tags: $tags,
                external: $external,
            };
        };
    };
}

/// Declare the target of the calling module under a short name, with its default level and
/// tags. The name and every tag can be used in a tracing config string.
#[macro_export]
macro_rules! trace_target {
    ($name:expr, $level:expr, $tags:expr) => {
        $crate::declare_target!(module_path!(), $name, $level, $tags, false);
    };
}

/// Declare a target that is not one of our module paths, such as `h2` or `tonic`.
#[macro_export]
macro_rules! custom_target {
    ($target:expr, $level:expr, $tags:expr) => {
        $crate::declare_target!($target, $target, $level, $tags, true);
    };
}
