// ── Per-sensor rule table ──
//
// Owns the alert rules of one sensor. Every setter validates first and
// writes second, so a rejected edit leaves the stored rule untouched, and
// reports `Mutation::Unchanged` when the value already matches.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::AlertError;
use crate::model::alert::normalize_description;
use crate::model::{AlertKind, AlertRule, AlertType, BoundEdge, Mutation};

#[derive(Debug, Clone)]
pub(crate) struct RuleTable {
    rules: BTreeMap<AlertType, AlertRule>,
    default_unseen_secs: u32,
}

impl RuleTable {
    pub(crate) fn new(default_unseen_secs: u32) -> Self {
        Self {
            rules: BTreeMap::new(),
            default_unseen_secs,
        }
    }

    /// Replace the table with rules loaded from persistence. Later
    /// duplicates of a type win.
    pub(crate) fn load(&mut self, rules: Vec<AlertRule>) {
        self.rules = rules.into_iter().map(|r| (r.alert_type(), r)).collect();
    }

    pub(crate) fn get(&self, alert: AlertType) -> Option<&AlertRule> {
        self.rules.get(&alert)
    }

    pub(crate) fn is_enabled(&self, alert: AlertType) -> bool {
        self.rules.get(&alert).is_some_and(AlertRule::is_enabled)
    }

    pub(crate) fn default_unseen_secs(&self) -> u32 {
        self.default_unseen_secs
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &AlertRule> {
        self.rules.values()
    }

    // ── Enable state ─────────────────────────────────────────────────

    /// Enable the rule with `kind`'s parameters. A rule that is already
    /// enabled is left exactly as it is, mute window included.
    pub(crate) fn register(&mut self, kind: AlertKind) -> Mutation {
        let alert = kind.alert_type();
        if self.is_enabled(alert) {
            return Mutation::Unchanged;
        }
        let rule = self
            .rules
            .entry(alert)
            .or_insert_with(|| AlertRule::new(kind));
        rule.set_kind(kind);
        rule.set_enabled(true);
        rule.set_muted_until(None);
        Mutation::Changed
    }

    /// Disable the rule, keeping its parameters for the next enable.
    pub(crate) fn unregister(&mut self, alert: AlertType) -> Mutation {
        match self.rules.get_mut(&alert) {
            Some(rule) if rule.is_enabled() => {
                rule.set_enabled(false);
                rule.set_muted_until(None);
                Mutation::Changed
            }
            _ => Mutation::Unchanged,
        }
    }

    // ── Parameters ───────────────────────────────────────────────────

    /// Move one edge of a range rule. Editing a bound reopens a muted rule.
    pub(crate) fn set_edge(
        &mut self,
        alert: AlertType,
        edge: BoundEdge,
        canonical: f64,
    ) -> Result<Mutation, AlertError> {
        let current = self.kind_or_default(alert);
        let next = current.with_edge(edge, canonical)?;
        Ok(self.replace_kind(alert, next))
    }

    pub(crate) fn set_unseen(
        &mut self,
        alert: AlertType,
        unseen_secs: u32,
    ) -> Result<Mutation, AlertError> {
        let current = self.kind_or_default(alert);
        let next = current.with_unseen(unseen_secs)?;
        Ok(self.replace_kind(alert, next))
    }

    pub(crate) fn set_description(
        &mut self,
        alert: AlertType,
        text: Option<String>,
    ) -> Result<Mutation, AlertError> {
        let text = normalize_description(text)?;
        if self.rules.get(&alert).and_then(AlertRule::description) == text.as_deref() {
            return Ok(Mutation::Unchanged);
        }
        self.entry(alert).set_description(text);
        Ok(Mutation::Changed)
    }

    // ── Mute windows ─────────────────────────────────────────────────

    /// Silence the rule until `until`. A timestamp that is not in the
    /// future is an unmute.
    pub(crate) fn mute_until(
        &mut self,
        alert: AlertType,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Mutation {
        if until <= now {
            return self.unmute(alert);
        }
        let rule = self.entry(alert);
        if rule.muted_until() == Some(until) {
            return Mutation::Unchanged;
        }
        rule.set_muted_until(Some(until));
        Mutation::Changed
    }

    pub(crate) fn unmute(&mut self, alert: AlertType) -> Mutation {
        match self.rules.get_mut(&alert) {
            Some(rule) if rule.muted_until().is_some() => {
                rule.set_muted_until(None);
                Mutation::Changed
            }
            _ => Mutation::Unchanged,
        }
    }

    /// Drop every mute window that has closed by `now`, returning the
    /// affected types.
    pub(crate) fn clear_expired_mutes(&mut self, now: DateTime<Utc>) -> Vec<AlertType> {
        let mut cleared = Vec::new();
        for (alert, rule) in &mut self.rules {
            if rule.muted_until().is_some_and(|until| until <= now) {
                rule.set_muted_until(None);
                cleared.push(*alert);
            }
        }
        cleared
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn kind_or_default(&self, alert: AlertType) -> AlertKind {
        self.rules.get(&alert).map_or_else(
            || alert.default_kind(0, self.default_unseen_secs),
            |r| *r.kind(),
        )
    }

    fn replace_kind(&mut self, alert: AlertType, next: AlertKind) -> Mutation {
        let rule = self.entry(alert);
        if *rule.kind() == next {
            return Mutation::Unchanged;
        }
        rule.set_kind(next);
        rule.set_muted_until(None);
        Mutation::Changed
    }

    fn entry(&mut self, alert: AlertType) -> &mut AlertRule {
        let default_unseen = self.default_unseen_secs;
        self.rules
            .entry(alert)
            .or_insert_with(|| AlertRule::new(alert.default_kind(0, default_unseen)))
    }
}
