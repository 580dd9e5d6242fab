//! Multi-dimensional access scoping.
//!
//! Every administrable resource carries a [`ScopeMap`]: one [`ScopeSetting`] per
//! access dimension. A request is described by an [`ExecutionScope`], the concrete
//! site/project/user/data-type it runs under. Evaluation is conjunctive:
//!
//! ```text
//!   Site ──► enabled || exec[Site] ∈ ids ──┐
//!   Project ► enabled || exec[Project] ∈ ids ─┼── AND ──► permitted
//!   User ──► enabled || exec[User] ∈ ids ──┘
//! ```
//!
//! A dimension whose setting is disabled and whose execution value is absent is
//! denied. No execution value acts as a wildcard.
//!
//! Different resource kinds require different dimensions to be present, so a
//! [`ScopeEngine`] is parameterized by its required set rather than hard-coding it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// An access-control dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// The whole XNAT site.
    Site,
    /// An XNAT project.
    Project,
    /// An individual user.
    User,
    /// An XNAT data type (xsi type).
    DataType,
}

impl Scope {
    /// All four dimensions.
    pub const ALL: [Self; 4] = [Self::Site, Self::Project, Self::User, Self::DataType];

    /// Return the canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Site => "Site",
            Self::Project => "Project",
            Self::User => "User",
            Self::DataType => "DataType",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|scope| scope.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::UnknownScope(s.to_string()))
    }
}

/// Access rule for one dimension.
///
/// `enabled` authorizes every principal at this dimension; otherwise only the
/// identifiers listed in `ids` are authorized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSetting {
    /// The dimension this setting governs.
    pub scope: Scope,
    /// Whether every principal is authorized.
    pub enabled: bool,
    /// Explicitly authorized identifiers when not enabled.
    #[serde(default)]
    pub ids: BTreeSet<String>,
}

impl ScopeSetting {
    /// A setting that authorizes everyone.
    #[must_use]
    pub const fn open(scope: Scope) -> Self {
        Self {
            scope,
            enabled: true,
            ids: BTreeSet::new(),
        }
    }

    /// A setting that authorizes only the given identifiers.
    #[must_use]
    pub fn restricted<I, S>(scope: Scope, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scope,
            enabled: false,
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Evaluate this dimension for an execution value.
    #[must_use]
    pub fn permits(&self, value: Option<&str>) -> bool {
        self.enabled || value.is_some_and(|v| self.ids.contains(v))
    }
}

/// Scope settings keyed by dimension.
pub type ScopeMap = BTreeMap<Scope, ScopeSetting>;

/// Build a [`ScopeMap`] from a list of settings.
#[must_use]
pub fn scope_map<I: IntoIterator<Item = ScopeSetting>>(settings: I) -> ScopeMap {
    settings.into_iter().map(|s| (s.scope, s)).collect()
}

/// The concrete principal and target a request executes under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionScope(BTreeMap<Scope, String>);

impl ExecutionScope {
    /// Create an empty execution scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value for a dimension.
    #[must_use]
    pub fn with(mut self, scope: Scope, value: impl Into<String>) -> Self {
        self.0.insert(scope, value.into());
        self
    }

    /// Set the project dimension.
    #[must_use]
    pub fn project(self, project_id: impl Into<String>) -> Self {
        self.with(Scope::Project, project_id)
    }

    /// Set the user dimension.
    #[must_use]
    pub fn user(self, username: impl Into<String>) -> Self {
        self.with(Scope::User, username)
    }

    /// Set the data type dimension.
    #[must_use]
    pub fn data_type(self, xsi_type: impl Into<String>) -> Self {
        self.with(Scope::DataType, xsi_type)
    }

    /// Look up the value for a dimension.
    #[must_use]
    pub fn get(&self, scope: Scope) -> Option<&str> {
        self.0.get(&scope).map(String::as_str)
    }
}

/// Evaluate every setting in `required` against `execution` and AND the results.
#[must_use]
pub fn is_enabled_for(required: &ScopeMap, execution: &ExecutionScope) -> bool {
    required
        .iter()
        .all(|(scope, setting)| setting.permits(execution.get(*scope)))
}

/// Anything that carries a scope map.
pub trait Scoped {
    /// Return the resource's scope settings.
    fn scopes(&self) -> &ScopeMap;
}

/// Scope evaluator for one resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeEngine {
    required: &'static [Scope],
}

/// Environment and hardware configs gate on site, project and user.
pub const ENVIRONMENT_SCOPES: ScopeEngine =
    ScopeEngine::new(&[Scope::Site, Scope::Project, Scope::User]);

/// Hardware configs share the environment dimension set.
pub const HARDWARE_SCOPES: ScopeEngine = ENVIRONMENT_SCOPES;

/// Constraint configs have no user dimension.
pub const CONSTRAINT_SCOPES: ScopeEngine = ScopeEngine::new(&[Scope::Site, Scope::Project]);

/// Dashboard configs gate on site, project and data type.
pub const DASHBOARD_SCOPES: ScopeEngine =
    ScopeEngine::new(&[Scope::Site, Scope::Project, Scope::DataType]);

impl ScopeEngine {
    /// Create an engine requiring the given dimensions.
    #[must_use]
    pub const fn new(required: &'static [Scope]) -> Self {
        Self { required }
    }

    /// The dimensions every resource of this kind must define.
    #[must_use]
    pub const fn required(&self) -> &'static [Scope] {
        self.required
    }

    /// Required dimensions absent from `scopes`.
    #[must_use]
    pub fn missing_scopes(&self, scopes: &ScopeMap) -> Vec<Scope> {
        self.required
            .iter()
            .copied()
            .filter(|scope| !scopes.contains_key(scope))
            .collect()
    }

    /// Whether `item` is available to `execution`.
    ///
    /// A resource missing any required dimension is treated as malformed and denied.
    #[must_use]
    pub fn is_available<T: Scoped + ?Sized>(&self, item: &T, execution: &ExecutionScope) -> bool {
        let scopes = item.scopes();
        self.missing_scopes(scopes).is_empty() && is_enabled_for(scopes, execution)
    }

    /// Keep only the items available to `execution`.
    #[must_use]
    pub fn filter_available<T: Scoped>(&self, items: Vec<T>, execution: &ExecutionScope) -> Vec<T> {
        items
            .into_iter()
            .filter(|item| self.is_available(item, execution))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Resource(ScopeMap);

    impl Scoped for Resource {
        fn scopes(&self) -> &ScopeMap {
            &self.0
        }
    }

    fn u1_p1() -> ExecutionScope {
        ExecutionScope::new().user("u1").project("p1")
    }

    fn site_user_project(users: &[&str], projects: &[&str]) -> Resource {
        Resource(scope_map([
            ScopeSetting::open(Scope::Site),
            ScopeSetting::restricted(Scope::User, users.iter().copied()),
            ScopeSetting::restricted(Scope::Project, projects.iter().copied()),
        ]))
    }

    #[test]
    fn enabled_setting_permits_any_value() {
        let setting = ScopeSetting::open(Scope::User);
        assert!(setting.permits(Some("anyone")));
        assert!(setting.permits(Some("")));
        assert!(setting.permits(None));
    }

    #[test]
    fn disabled_setting_permits_only_members() {
        let setting = ScopeSetting::restricted(Scope::Project, ["p1", "p2"]);
        assert!(setting.permits(Some("p1")));
        assert!(setting.permits(Some("p2")));
        assert!(!setting.permits(Some("p3")));
    }

    #[test]
    fn disabled_setting_fails_closed_without_value() {
        let setting = ScopeSetting::restricted(Scope::Project, ["p1"]);
        assert!(!setting.permits(None));
        let map = scope_map([setting]);
        assert!(!is_enabled_for(&map, &ExecutionScope::new()));
    }

    #[test]
    fn all_dimensions_must_authorize() {
        let resource = site_user_project(&["u1"], &["p1"]);
        assert!(ENVIRONMENT_SCOPES.is_available(&resource, &u1_p1()));

        let wrong_user = site_user_project(&["u2"], &["p1"]);
        assert!(!ENVIRONMENT_SCOPES.is_available(&wrong_user, &u1_p1()));

        let wrong_project = site_user_project(&["u1"], &["p2"]);
        assert!(!ENVIRONMENT_SCOPES.is_available(&wrong_project, &u1_p1()));
    }

    #[test]
    fn disabled_site_without_site_value_denies() {
        let resource = Resource(scope_map([
            ScopeSetting::restricted(Scope::Site, ["XNAT"]),
            ScopeSetting::open(Scope::User),
            ScopeSetting::open(Scope::Project),
        ]));
        assert!(!ENVIRONMENT_SCOPES.is_available(&resource, &u1_p1()));
        let with_site = u1_p1().with(Scope::Site, "XNAT");
        assert!(ENVIRONMENT_SCOPES.is_available(&resource, &with_site));
    }

    #[test]
    fn missing_required_dimension_denies() {
        let resource = Resource(scope_map([
            ScopeSetting::open(Scope::Site),
            ScopeSetting::open(Scope::Project),
        ]));
        assert!(!ENVIRONMENT_SCOPES.is_available(&resource, &u1_p1()));
        assert_eq!(ENVIRONMENT_SCOPES.missing_scopes(resource.scopes()), vec![Scope::User]);
        assert!(CONSTRAINT_SCOPES.is_available(&resource, &u1_p1()));
    }

    #[test]
    fn extra_dimensions_are_still_evaluated() {
        let resource = Resource(scope_map([
            ScopeSetting::open(Scope::Site),
            ScopeSetting::open(Scope::Project),
            ScopeSetting::restricted(Scope::User, ["u2"]),
        ]));
        assert!(!CONSTRAINT_SCOPES.is_available(&resource, &u1_p1()));
    }

    #[test]
    fn dashboard_engine_requires_data_type() {
        let resource = Resource(scope_map([
            ScopeSetting::open(Scope::Site),
            ScopeSetting::open(Scope::Project),
            ScopeSetting::restricted(Scope::DataType, ["xnat:mrSessionData"]),
        ]));
        let exec = u1_p1().data_type("xnat:mrSessionData");
        assert!(DASHBOARD_SCOPES.is_available(&resource, &exec));
        let ct = u1_p1().data_type("xnat:ctSessionData");
        assert!(!DASHBOARD_SCOPES.is_available(&resource, &ct));
    }

    #[test]
    fn filter_available_keeps_permitted() {
        let items = vec![
            site_user_project(&["u1"], &["p1"]),
            site_user_project(&["u2"], &["p1"]),
        ];
        let kept = ENVIRONMENT_SCOPES.filter_available(items, &u1_p1());
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn scope_parse() {
        assert_eq!("datatype".parse::<Scope>().unwrap(), Scope::DataType);
        assert_eq!("Site".parse::<Scope>().unwrap(), Scope::Site);
        assert!(matches!(
            "Galaxy".parse::<Scope>(),
            Err(CoreError::UnknownScope(_))
        ));
    }
}
