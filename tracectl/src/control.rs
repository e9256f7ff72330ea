// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Tracing runtime control.

use ordermap::OrderMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, Registry, filter::LevelFilter, prelude::*, reload};

use crate::{targets::TARGETS, trace_target};

trace_target!("tracectl", LevelFilter::INFO, &[]);

/// Tag that sets the level used for events outside any declared target.
pub const DEFAULT_TAG: &str = "default";
/// Tag that sets the level of every declared target.
pub const ALL_TAG: &str = "all";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TracingError {
    #[error("invalid tracing config '{0}': expected tag=level")]
    Syntax(String),
    #[error("invalid level '{level}' for tag '{tag}'")]
    Level { tag: String, level: String },
}

#[derive(Debug, Clone)]
pub struct TargetCfg {
    target: &'static str,
    name: &'static str,
    level: LevelFilter,
    tags: Vec<&'static str>,
    custom: bool,
}

impl TargetCfg {
    fn new(
        target: &'static str,
        name: &'static str,
        level: LevelFilter,
        tags: &'static [&'static str],
        custom: bool,
    ) -> Self {
        // a target can always be addressed by its name
        let mut tags = tags.to_vec();
        if !tags.contains(&name) {
            tags.push(name);
        }
        Self {
            target,
            name,
            level,
            tags,
            custom,
        }
    }

    #[must_use]
    pub fn target(&self) -> &'static str {
        self.target
    }
    #[must_use]
    pub fn level(&self) -> LevelFilter {
        self.level
    }
    #[must_use]
    pub fn is_custom(&self) -> bool {
        self.custom
    }
}

#[derive(Debug)]
struct TargetCfgDb {
    level: LevelFilter,
    targets: OrderMap<&'static str, TargetCfg>,
    tags: OrderMap<&'static str, HashSet<&'static str>>,
}

impl TargetCfgDb {
    fn new(level: LevelFilter) -> Self {
        let mut db = Self {
            level,
            targets: OrderMap::new(),
            tags: OrderMap::new(),
        };
        for decl in TARGETS {
            db.register(TargetCfg::new(
                decl.target,
                decl.name,
                decl.level,
                decl.tags,
                decl.external,
            ));
        }
        db
    }

    fn register(&mut self, cfg: TargetCfg) {
        let target = cfg.target;
        for tag in &cfg.tags {
            self.tags.entry(*tag).or_default().insert(target);
        }
        if let Some(exist) = self.targets.insert(target, cfg) {
            warn!("Target {} has been multiply defined!", exist.target);
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::new(self.level.to_string());
        for target in self.targets.values() {
            match format!("{}={}", target.target, target.level).parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(e) => warn!("Skipping target {}: {e}", target.target),
            }
        }
        filter
    }

    fn tagged_mut(&mut self, tag: &str) -> impl Iterator<Item = &mut TargetCfg> {
        let members = self.tags.get(tag).cloned().unwrap_or_default();
        self.targets
            .values_mut()
            .filter(move |t| members.contains(t.target))
    }

    /// One row per target, columns sized to their widest cell.
    fn table(&self) -> String {
        let mut rows = vec![["TARGET".to_string(), "NAME".into(), "LEVEL".into(), "TAGS".into()]];
        rows.extend(self.targets.values().map(|t| {
            [
                t.target.to_string(),
                t.name.to_string(),
                t.level.to_string(),
                t.tags.join(","),
            ]
        }));
        rows.push([
            "(default)".to_string(),
            DEFAULT_TAG.into(),
            self.level.to_string(),
            "-".into(),
        ]);
        let width = |col: usize| rows.iter().map(|r| r[col].len()).max().unwrap_or(0);
        let (w0, w1, w2) = (width(0), width(1), width(2));
        rows.iter()
            .map(|[target, name, level, tags]| {
                format!("{target:<w0$}  {name:<w1$}  {level:<w2$}  {tags}\n")
            })
            .collect()
    }

    fn as_config_string(&self) -> String {
        let mut out = format!("{DEFAULT_TAG}={}", self.level);
        for target in self.targets.values() {
            out += &format!(",{}={}", target.name, target.level);
        }
        out
    }
}

/// Owner of the process-wide subscriber and of the per-target levels.
#[derive(Debug)]
pub struct TracingControl {
    db: Mutex<TargetCfgDb>,
    reload_filter: reload::Handle<EnvFilter, Registry>,
}

static TRACING_CTL: OnceLock<TracingControl> = OnceLock::new();

/// Get the process [`TracingControl`], installing the subscriber on first use.
pub fn get_trace_ctl() -> &'static TracingControl {
    TRACING_CTL.get_or_init(TracingControl::new)
}

impl TracingControl {
    fn new() -> Self {
        let db = TargetCfgDb::new(LevelFilter::INFO);
        let (filter, reload_filter) = reload::Layer::new(db.env_filter());

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(true)
            .with_level(true);

        // a test harness may have installed its own subscriber already
        if let Err(e) = tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
        {
            debug!("Tracing subscriber not installed: {e}");
        }

        Self {
            db: Mutex::new(db),
            reload_filter,
        }
    }

    fn reload(&self, db: &TargetCfgDb) {
        if let Err(e) = self.reload_filter.reload(db.env_filter()) {
            debug!("Failed to reload tracing filter: {e}");
        }
    }

    /// Set the level of every target carrying `tag`. Returns how many targets changed.
    pub fn set_tag_level(&self, tag: &str, level: LevelFilter) -> usize {
        let mut db = self.db.lock();
        let mut changed = 0;
        for target in db.tagged_mut(tag).filter(|t| t.level != level) {
            target.level = level;
            changed += 1;
        }
        if changed > 0 {
            self.reload(&db);
        } else if !db.tags.contains_key(tag) {
            warn!("No tracing target is tagged '{tag}'");
        }
        debug!("Log level for tag '{tag}' set to {level} ({changed} targets changed)");
        changed
    }

    pub fn set_level_all(&self, level: LevelFilter) {
        let mut db = self.db.lock();
        for target in db.targets.values_mut() {
            target.level = level;
        }
        self.reload(&db);
    }

    pub fn set_default_level(&self, level: LevelFilter) {
        let mut db = self.db.lock();
        if db.level != level {
            db.level = level;
            info!("Set default log level to {level}");
            self.reload(&db);
        }
    }

    #[must_use]
    pub fn default_level(&self) -> LevelFilter {
        self.db.lock().level
    }

    /// Parse comma-separated `tag=level` items. Levels are off, error, warn, info, debug, trace.
    fn parse_tracing_config(input: &str) -> Result<OrderMap<String, LevelFilter>, TracingError> {
        let mut result = OrderMap::new();
        for item in input.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let (tag, level) = item
                .split_once('=')
                .ok_or_else(|| TracingError::Syntax(item.to_string()))?;
            let (tag, level) = (tag.trim(), level.trim());
            let parsed = LevelFilter::from_str(level).map_err(|_| TracingError::Level {
                tag: tag.to_string(),
                level: level.to_string(),
            })?;
            result.insert(tag.to_string(), parsed);
        }
        Ok(result)
    }

    /// Apply a config string like `default=info,session=debug,all=warn`.
    ///
    /// `default` and `all` are applied first, so `all=warn,session=debug` leaves `session` at
    /// debug. Nothing is applied if any item fails to parse.
    ///
    /// # Errors
    ///
    /// A [`TracingError`] when an item is not `tag=level` or the level is unknown.
    pub fn setup_from_string(&self, input: &str) -> Result<(), TracingError> {
        let config = Self::parse_tracing_config(input)?;
        if let Some(level) = config.get(DEFAULT_TAG) {
            self.set_default_level(*level);
        }
        if let Some(level) = config.get(ALL_TAG) {
            self.set_level_all(*level);
        }
        for (tag, level) in config
            .iter()
            .filter(|(tag, _)| *tag != DEFAULT_TAG && *tag != ALL_TAG)
        {
            self.set_tag_level(tag, *level);
        }
        Ok(())
    }

    #[must_use]
    pub fn get_target(&self, target: &str) -> Option<TargetCfg> {
        self.db.lock().targets.get(target).cloned()
    }

    #[must_use]
    pub fn get_targets_by_tag(&self, tag: &str) -> Vec<TargetCfg> {
        let db = self.db.lock();
        let Some(members) = db.tags.get(tag) else {
            return vec![];
        };
        db.targets
            .values()
            .filter(|t| members.contains(t.target))
            .cloned()
            .collect()
    }

    /// The current configuration as a string [`Self::setup_from_string`] would accept.
    #[must_use]
    pub fn as_config_string(&self) -> String {
        self.db.lock().as_config_string()
    }

    /// The target table, one target per line.
    #[must_use]
    pub fn targets_table(&self) -> String {
        self.db.lock().table()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custom_target;

    #[test]
    fn link_time_targets_are_registered() {
        custom_target!("tracectl-test-late", LevelFilter::WARN, &["late"]);

        let tctl = get_trace_ctl();
        assert!(tctl.get_target("inframgr_tracectl::control").is_some());
        let late = tctl.get_target("tracectl-test-late").unwrap();
        assert!(late.is_custom());
        assert_eq!(late.level(), LevelFilter::WARN);
        assert!(tctl.targets_table().contains("tracectl-test-late"));
    }

    #[test]
    fn tag_level_applies_to_every_member() {
        const TAG: &str = "tracectl-common";
        custom_target!("tracectl-t1", LevelFilter::DEBUG, &[TAG]);
        custom_target!("tracectl-t2", LevelFilter::ERROR, &[TAG]);

        let tctl = get_trace_ctl();
        assert_eq!(tctl.get_targets_by_tag(TAG).len(), 2);
        assert_eq!(tctl.set_tag_level(TAG, LevelFilter::OFF), 2);
        for t in tctl.get_targets_by_tag(TAG) {
            assert_eq!(t.level(), LevelFilter::OFF);
        }
        assert_eq!(tctl.set_tag_level(TAG, LevelFilter::OFF), 0);
        assert_eq!(tctl.set_tag_level("no-such-tag", LevelFilter::OFF), 0);
    }

    #[test]
    fn setup_from_string_sets_names_and_tags() {
        custom_target!("tracectl-s1", LevelFilter::INFO, &["tracectl-s"]);
        custom_target!("tracectl-s2", LevelFilter::INFO, &[]);

        let tctl = get_trace_ctl();
        tctl.setup_from_string("default=info, tracectl-s=trace ,tracectl-s2=error")
            .unwrap();
        assert_eq!(
            tctl.get_target("tracectl-s1").unwrap().level(),
            LevelFilter::TRACE
        );
        assert_eq!(
            tctl.get_target("tracectl-s2").unwrap().level(),
            LevelFilter::ERROR
        );
        assert!(tctl.as_config_string().contains("tracectl-s2=error"));
    }

    #[test]
    fn bad_config_strings_are_rejected() {
        let tctl = get_trace_ctl();
        assert_eq!(
            tctl.setup_from_string("tracectl=loud"),
            Err(TracingError::Level {
                tag: "tracectl".to_string(),
                level: "loud".to_string()
            })
        );
        assert_eq!(
            tctl.setup_from_string("tracectl=info,bogus"),
            Err(TracingError::Syntax("bogus".to_string()))
        );
    }
}
