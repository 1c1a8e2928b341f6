use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum EngineError {
    #[error("query error: {0}")]
    Query(String),
    #[error("remote lookup error: {0}")]
    Remote(String),
    #[error("evaluating {0} requires administrator membership")]
    MissingDependency(&'static str),
}

/// Compact `YYYYMMDDHHMMSS` timestamp as used by the wiki's log and
/// revision tables. Comparable numerically, and lexicographically once
/// zero-padded to 14 digits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LogTimestamp(u64);

impl LogTimestamp {
    #[must_use]
    pub const fn from_compact(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Parse the 14-digit compact form. Anything else is `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() != 14 || !raw.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        raw.parse::<u64>().ok().map(Self)
    }

    #[must_use]
    pub fn from_datetime(value: OffsetDateTime) -> Self {
        compact_from_parts(
            value.year(),
            i32::from(u8::from(value.month())),
            value.day(),
            value.hour(),
            value.minute(),
            value.second(),
        )
    }

    /// Cutoff `months` calendar months before `now`. The day and time
    /// digits are carried over unchanged, so the result is a synthetic
    /// numeric cutoff rather than a validated calendar date.
    #[must_use]
    pub fn months_before(now: OffsetDateTime, months: u32) -> Self {
        let mut year = now.year();
        let mut month = i32::from(u8::from(now.month())) - i32::try_from(months).unwrap_or(0);
        while month < 1 {
            month += 12;
            year -= 1;
        }
        compact_from_parts(year, month, now.day(), now.hour(), now.minute(), now.second())
    }

    /// Zero-padded 14-digit form, suitable for lexicographic comparison
    /// against raw database timestamps.
    #[must_use]
    pub fn compact_string(self) -> String {
        format!("{:014}", self.0)
    }

    #[must_use]
    pub fn date_string(self) -> String {
        let year = self.0 / 10_000_000_000;
        let month = self.0 / 100_000_000 % 100;
        let day = self.0 / 1_000_000 % 100;
        format!("{year:04}-{month:02}-{day:02}")
    }
}

impl Display for LogTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.compact_string())
    }
}

fn compact_from_parts(year: i32, month: i32, day: u8, hour: u8, minute: u8, second: u8) -> LogTimestamp {
    let year = u64::try_from(year.max(0)).unwrap_or(0);
    let month = u64::try_from(month.max(0)).unwrap_or(0);
    LogTimestamp(
        year * 10_000_000_000
            + month * 100_000_000
            + u64::from(day) * 1_000_000
            + u64::from(hour) * 10_000
            + u64::from(minute) * 100
            + u64::from(second),
    )
}

/// The observation window for one policy role: `cutoff` is the start of
/// the full window, `warn_cutoff` is one month later (a one-month-shorter
/// window used for the advance-warning signal).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct CutoffPair {
    pub cutoff: LogTimestamp,
    pub warn_cutoff: LogTimestamp,
}

impl CutoffPair {
    #[must_use]
    pub fn for_window(now: OffsetDateTime, window_months: u32) -> Self {
        Self {
            cutoff: LogTimestamp::months_before(now, window_months),
            warn_cutoff: LogTimestamp::months_before(now, window_months.saturating_sub(1)),
        }
    }
}

pub const ADMIN_WINDOW_MONTHS: u32 = 6;
pub const ADMIN_MIN_ACTIONS: u64 = 5;
pub const BUREAUCRAT_WINDOW_MONTHS: u32 = 6;
pub const BUREAUCRAT_MIN_ACTIONS: u64 = 10;
pub const INTERFACE_ADMIN_WINDOW_MONTHS: u32 = 12;
pub const INTERFACE_ADMIN_MIN_ACTIONS: u64 = 1;
pub const GENERAL_ACTIVITY_WINDOW_MONTHS: u32 = 6;
pub const TRANSLATION_ADMIN_WINDOW_MONTHS: u32 = 6;
pub const TRANSLATION_ADMIN_MIN_ACTIONS: u64 = 1;
pub const PROPERTY_CREATOR_WINDOW_MONTHS: u32 = 6;
pub const PROPERTY_CREATOR_MIN_ACTIONS: u64 = 1;

/// Log types whose entries count as administrative actions.
pub const ADMIN_LOG_TYPES: &[&str] = &[
    "abusefilter",
    "block",
    "contentmodel",
    "delete",
    "import",
    "managetags",
    "merge",
    "protect",
    "rights",
];

pub const TRANSLATION_ADMIN_LOG_TYPES: &[&str] = &["pagelang", "pagetranslation"];

/// Groups a bureaucrat may grant; granting one counts as a bureaucrat action.
pub const BUREAUCRAT_GRANTABLE_GROUPS: &[&str] = &[
    "accountcreator",
    "bot",
    "bureaucrat",
    "confirmed",
    "flood",
    "interface-admin",
    "sysop",
    "translationadmin",
    "wikidata-staff",
];

/// Groups a bureaucrat may revoke; revoking one counts as a bureaucrat action.
pub const BUREAUCRAT_REVOCABLE_GROUPS: &[&str] = &[
    "accountcreator",
    "bot",
    "confirmed",
    "flood",
    "interface-admin",
    "translationadmin",
    "wikidata-staff",
];

/// Accounts with no promotion record by design; never resolved through
/// the rights or rename logs.
pub const SYSTEM_ACCOUNTS: &[&str] = &[
    "Abuse filter",
    "Maintenance script",
    "MediaWiki default",
    "MediaWiki message delivery",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RoleKind {
    Administrator,
    Bureaucrat,
    Oversighter,
    Checkuser,
    InterfaceAdmin,
    TranslationAdmin,
    PropertyCreator,
    Bot,
    Flooder,
    #[serde(rename = "ipblock-exempt")]
    IpBlockExempt,
    Rollbacker,
    #[serde(rename = "confirmed")]
    ConfirmedUser,
}

impl RoleKind {
    pub const ALL: [Self; 12] = [
        Self::Administrator,
        Self::Bureaucrat,
        Self::Oversighter,
        Self::Checkuser,
        Self::InterfaceAdmin,
        Self::TranslationAdmin,
        Self::PropertyCreator,
        Self::Bot,
        Self::Flooder,
        Self::IpBlockExempt,
        Self::Rollbacker,
        Self::ConfirmedUser,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Administrator => "administrator",
            Self::Bureaucrat => "bureaucrat",
            Self::Oversighter => "oversighter",
            Self::Checkuser => "checkuser",
            Self::InterfaceAdmin => "interface-admin",
            Self::TranslationAdmin => "translation-admin",
            Self::PropertyCreator => "property-creator",
            Self::Bot => "bot",
            Self::Flooder => "flooder",
            Self::IpBlockExempt => "ipblock-exempt",
            Self::Rollbacker => "rollbacker",
            Self::ConfirmedUser => "confirmed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.as_str() == value)
    }

    /// The user-group name in the identity store.
    #[must_use]
    pub fn group(self) -> &'static str {
        match self {
            Self::Administrator => "sysop",
            Self::Bureaucrat => "bureaucrat",
            Self::Oversighter => "suppress",
            Self::Checkuser => "checkuser",
            Self::InterfaceAdmin => "interface-admin",
            Self::TranslationAdmin => "translationadmin",
            Self::PropertyCreator => "propertycreator",
            Self::Bot => "bot",
            Self::Flooder => "flood",
            Self::IpBlockExempt => "ipblock-exempt",
            Self::Rollbacker => "rollbacker",
            Self::ConfirmedUser => "confirmed",
        }
    }

    /// Deprecated predecessor group names whose promotion history still
    /// counts toward this role.
    #[must_use]
    pub fn former_groups(self) -> &'static [&'static str] {
        match self {
            Self::Oversighter => &["oversight"],
            _ => &[],
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Administrator => "admin",
            Self::Bureaucrat => "bureaucrat",
            Self::Oversighter => "oversighter",
            Self::Checkuser => "checkuser",
            Self::InterfaceAdmin => "interface admin",
            Self::TranslationAdmin => "translation admin",
            Self::PropertyCreator => "property creator",
            Self::Bot => "bot",
            Self::Flooder => "flooder",
            Self::IpBlockExempt => "IP block exempt user",
            Self::Rollbacker => "rollbacker",
            Self::ConfirmedUser => "confirmed user",
        }
    }

    /// Report page name for this role's table.
    #[must_use]
    pub fn report_page_name(self) -> &'static str {
        match self {
            Self::Administrator => "Administrator",
            Self::Bureaucrat => "Bureaucrat",
            Self::Oversighter => "Oversighter",
            Self::Checkuser => "CheckUser",
            Self::InterfaceAdmin => "Interface administrator",
            Self::TranslationAdmin => "Translation administrator",
            Self::PropertyCreator => "Property creator",
            Self::Bot => "Bot",
            Self::Flooder => "Flooder",
            Self::IpBlockExempt => "IP block exempted user",
            Self::Rollbacker => "Rollbacker",
            Self::ConfirmedUser => "Confirmed user",
        }
    }

    #[must_use]
    pub fn window_months(self) -> Option<u32> {
        match self {
            Self::Administrator => Some(ADMIN_WINDOW_MONTHS),
            Self::Bureaucrat => Some(BUREAUCRAT_WINDOW_MONTHS),
            Self::InterfaceAdmin => Some(INTERFACE_ADMIN_WINDOW_MONTHS),
            Self::TranslationAdmin => Some(TRANSLATION_ADMIN_WINDOW_MONTHS),
            Self::PropertyCreator => Some(PROPERTY_CREATOR_WINDOW_MONTHS),
            _ => None,
        }
    }

    #[must_use]
    pub fn has_policy(self) -> bool {
        self.window_months().is_some()
    }

    /// Whether this role's validity depends on concurrently held admin rights.
    #[must_use]
    pub fn requires_admin_link(self) -> bool {
        matches!(self, Self::Bureaucrat | Self::Oversighter)
    }

    #[must_use]
    pub fn column_headers(self) -> Vec<String> {
        let promoted = format!("promoted to {}", self.label());
        match self {
            Self::Administrator => vec![
                self.label().to_string(),
                promoted,
                format!("logged actions (past {ADMIN_WINDOW_MONTHS} months)"),
            ],
            Self::Bureaucrat => vec![
                self.label().to_string(),
                promoted,
                format!("logged bureaucrat actions (past {BUREAUCRAT_WINDOW_MONTHS} months)"),
                format!("logged admin+bureaucrat actions (past {BUREAUCRAT_WINDOW_MONTHS} months)"),
                "is admin".to_string(),
            ],
            Self::Oversighter => {
                vec![self.label().to_string(), promoted, "is admin".to_string()]
            }
            Self::Checkuser => {
                vec![self.label().to_string(), promoted, "last edit".to_string()]
            }
            Self::InterfaceAdmin => vec![
                self.label().to_string(),
                promoted,
                format!("interface admin actions (past {INTERFACE_ADMIN_WINDOW_MONTHS} months)"),
                format!("any activity (past {GENERAL_ACTIVITY_WINDOW_MONTHS} months)"),
            ],
            Self::TranslationAdmin => vec![
                self.label().to_string(),
                promoted,
                format!("translation admin actions (past {TRANSLATION_ADMIN_WINDOW_MONTHS} months)"),
                "last edit".to_string(),
            ],
            Self::PropertyCreator => vec![
                self.label().to_string(),
                promoted,
                format!("property creations (past {PROPERTY_CREATOR_WINDOW_MONTHS} months)"),
                "last edit".to_string(),
            ],
            Self::Bot | Self::Flooder | Self::IpBlockExempt | Self::Rollbacker | Self::ConfirmedUser => {
                vec![
                    self.label().to_string(),
                    promoted,
                    "edit count".to_string(),
                    "last edit".to_string(),
                ]
            }
        }
    }
}

impl Display for RoleKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Old/new group sets decoded from one rights-change log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDelta {
    pub old_groups: Vec<String>,
    pub new_groups: Vec<String>,
}

impl GroupDelta {
    #[must_use]
    pub fn grants(&self, group: &str) -> bool {
        !self.old_groups.iter().any(|name| name == group)
            && self.new_groups.iter().any(|name| name == group)
    }

    #[must_use]
    pub fn revokes(&self, group: &str) -> bool {
        self.old_groups.iter().any(|name| name == group)
            && !self.new_groups.iter().any(|name| name == group)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameRecord {
    pub old_name: String,
    pub new_name: String,
}

/// Decode the PHP-serialized parameter blob of a rights-change log entry.
///
/// Legacy entries use an older parameter layout the reader cannot decode;
/// those yield `None` and are skipped by callers, never treated as fatal.
#[must_use]
pub fn decode_group_delta(blob: &[u8]) -> Option<GroupDelta> {
    let entries = parse_php_map(blob)?;
    let old_groups = string_values(map_lookup(&entries, "4::oldgroups")?)?;
    let new_groups = string_values(map_lookup(&entries, "5::newgroups")?)?;
    Some(GroupDelta { old_groups, new_groups })
}

/// Decode the PHP-serialized parameter blob of a global-rename log entry.
#[must_use]
pub fn decode_rename(blob: &[u8]) -> Option<RenameRecord> {
    let entries = parse_php_map(blob)?;
    let old_name = utf8_string(map_lookup(&entries, "4::olduser")?)?;
    let new_name = utf8_string(map_lookup(&entries, "5::newuser")?)?;
    Some(RenameRecord { old_name, new_name })
}

const PHP_MAX_DEPTH: u8 = 8;
const PHP_MAX_ARRAY_LEN: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PhpValue {
    Int(i64),
    Str(Vec<u8>),
    Bool(bool),
    Float,
    Null,
    Array(Vec<(PhpValue, PhpValue)>),
}

struct PhpReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PhpReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn next_byte(&mut self) -> Option<u8> {
        let byte = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    fn expect(&mut self, expected: u8) -> Option<()> {
        (self.next_byte()? == expected).then_some(())
    }

    fn number_until(&mut self, terminator: u8) -> Option<i64> {
        let start = self.pos;
        while *self.bytes.get(self.pos)? != terminator {
            self.pos += 1;
        }
        let raw = std::str::from_utf8(&self.bytes[start..self.pos]).ok()?;
        self.pos += 1;
        raw.parse::<i64>().ok()
    }

    fn skip_until(&mut self, terminator: u8) -> Option<()> {
        while *self.bytes.get(self.pos)? != terminator {
            self.pos += 1;
        }
        self.pos += 1;
        Some(())
    }

    fn value(&mut self, depth: u8) -> Option<PhpValue> {
        if depth == 0 {
            return None;
        }
        match self.next_byte()? {
            b'i' => {
                self.expect(b':')?;
                Some(PhpValue::Int(self.number_until(b';')?))
            }
            b'b' => {
                self.expect(b':')?;
                let flag = self.next_byte()?;
                self.expect(b';')?;
                match flag {
                    b'0' => Some(PhpValue::Bool(false)),
                    b'1' => Some(PhpValue::Bool(true)),
                    _ => None,
                }
            }
            b'N' => {
                self.expect(b';')?;
                Some(PhpValue::Null)
            }
            b'd' => {
                self.expect(b':')?;
                self.skip_until(b';')?;
                Some(PhpValue::Float)
            }
            b's' => {
                self.expect(b':')?;
                let len = usize::try_from(self.number_until(b':')?).ok()?;
                self.expect(b'"')?;
                let end = self.pos.checked_add(len)?;
                let body = self.bytes.get(self.pos..end)?.to_vec();
                self.pos = end;
                self.expect(b'"')?;
                self.expect(b';')?;
                Some(PhpValue::Str(body))
            }
            b'a' => {
                self.expect(b':')?;
                let count = usize::try_from(self.number_until(b':')?).ok()?;
                if count > PHP_MAX_ARRAY_LEN {
                    return None;
                }
                self.expect(b'{')?;
                let mut entries = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    let key = self.value(depth - 1)?;
                    let value = self.value(depth - 1)?;
                    entries.push((key, value));
                }
                self.expect(b'}')?;
                Some(PhpValue::Array(entries))
            }
            _ => None,
        }
    }
}

fn parse_php_map(blob: &[u8]) -> Option<Vec<(PhpValue, PhpValue)>> {
    match PhpReader::new(blob).value(PHP_MAX_DEPTH)? {
        PhpValue::Array(entries) => Some(entries),
        _ => None,
    }
}

fn map_lookup<'a>(entries: &'a [(PhpValue, PhpValue)], key: &str) -> Option<&'a PhpValue> {
    entries.iter().find_map(|(entry_key, entry_value)| match entry_key {
        PhpValue::Str(bytes) if bytes.as_slice() == key.as_bytes() => Some(entry_value),
        _ => None,
    })
}

fn string_values(value: &PhpValue) -> Option<Vec<String>> {
    let PhpValue::Array(entries) = value else {
        return None;
    };
    let mut out = Vec::with_capacity(entries.len());
    for (_, entry) in entries {
        out.push(utf8_string(entry)?);
    }
    Some(out)
}

fn utf8_string(value: &PhpValue) -> Option<String> {
    let PhpValue::Str(bytes) = value else {
        return None;
    };
    String::from_utf8(bytes.clone()).ok()
}

/// Which rights log a row came from: the wiki's own log, or the central
/// cross-wiki log with its `<user>@<wiki>` title convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RightsLogSource {
    LocalWiki,
    CentralWiki,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RightsChangeRow {
    pub timestamp: LogTimestamp,
    pub params: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPageEdit {
    pub title: String,
    pub namespace: i64,
}

/// Read access to the wiki's relational replica. Every call issues fresh
/// queries; results are never cached across members or roles.
pub trait ReplicaGateway {
    /// Current members of a user group, alphabetical per the identity
    /// store's collation.
    ///
    /// # Errors
    /// Returns [`EngineError::Query`] when the statement fails; the error
    /// is fatal for the role being evaluated.
    fn group_members(&self, group: &str) -> Result<Vec<String>, EngineError>;

    /// # Errors
    /// Returns [`EngineError::Query`] on query failure.
    fn edit_count(&self, username: &str) -> Result<u64, EngineError>;

    /// # Errors
    /// Returns [`EngineError::Query`] on query failure.
    fn latest_edit_timestamp(&self, username: &str) -> Result<Option<LogTimestamp>, EngineError>;

    /// # Errors
    /// Returns [`EngineError::Query`] on query failure.
    fn logged_action_count(
        &self,
        username: &str,
        log_types: &[&str],
        since: LogTimestamp,
    ) -> Result<u64, EngineError>;

    /// First revisions of pages in the property namespace.
    ///
    /// # Errors
    /// Returns [`EngineError::Query`] on query failure.
    fn property_creation_count(&self, username: &str, since: LogTimestamp) -> Result<u64, EngineError>;

    /// Interface-namespace edits to pages that are not scripts or styles.
    ///
    /// # Errors
    /// Returns [`EngineError::Query`] on query failure.
    fn interface_message_edit_count(
        &self,
        username: &str,
        since: LogTimestamp,
    ) -> Result<u64, EngineError>;

    /// Edits to script/style/json pages anywhere, one row per revision.
    ///
    /// # Errors
    /// Returns [`EngineError::Query`] on query failure.
    fn script_page_edits(
        &self,
        username: &str,
        since: LogTimestamp,
    ) -> Result<Vec<ScriptPageEdit>, EngineError>;

    /// Rights-change log rows *about* this username.
    ///
    /// # Errors
    /// Returns [`EngineError::Query`] on query failure.
    fn rights_change_rows(
        &self,
        username: &str,
        source: RightsLogSource,
    ) -> Result<Vec<RightsChangeRow>, EngineError>;

    /// Rights-change log rows *performed by* this username since the cutoff.
    ///
    /// # Errors
    /// Returns [`EngineError::Query`] on query failure.
    fn own_rights_action_rows(
        &self,
        username: &str,
        since: LogTimestamp,
    ) -> Result<Vec<RightsChangeRow>, EngineError>;

    /// Raw parameter blobs of global-rename log rows targeting this username.
    ///
    /// # Errors
    /// Returns [`EngineError::Query`] on query failure.
    fn rename_log_params(&self, username: &str) -> Result<Vec<Vec<u8>>, EngineError>;
}

/// Remote lookup of the most recent logged action for a user.
pub trait ActivityLookup {
    /// # Errors
    /// Returns [`EngineError::Remote`] on transport or payload failure;
    /// remote failures propagate, they are never swallowed.
    fn latest_logged_action(&self, username: &str) -> Result<Option<LogTimestamp>, EngineError>;
}

/// Raw activity signals for one member, built once per run from fresh
/// queries and immutable afterwards.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub edit_count: u64,
    pub last_edit: Option<LogTimestamp>,
    pub last_logged_action: Option<LogTimestamp>,
}

impl UserRecord {
    /// # Errors
    /// Propagates gateway and remote-lookup failures.
    pub fn fetch(
        replica: &dyn ReplicaGateway,
        activity: &dyn ActivityLookup,
        username: &str,
    ) -> Result<Self, EngineError> {
        let last_edit = replica.latest_edit_timestamp(username)?;
        let last_logged_action = activity.latest_logged_action(username)?;
        let edit_count = replica.edit_count(username)?;
        Ok(Self {
            username: username.to_string(),
            edit_count,
            last_edit,
            last_logged_action,
        })
    }

    #[must_use]
    pub fn last_activity(&self) -> Option<LogTimestamp> {
        match (self.last_edit, self.last_logged_action) {
            (Some(edit), Some(logged)) => Some(edit.max(logged)),
            (edit, logged) => edit.or(logged),
        }
    }

    #[must_use]
    pub fn last_edit_date(&self) -> String {
        self.last_edit.map_or_else(|| "None".to_string(), LogTimestamp::date_string)
    }
}

/// Every historical moment a user gained a role, deduplicated by exact
/// timestamp and ascending. Empty is a valid state (grandfathered or
/// system accounts) and yields an absent latest promotion, never zero.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PromotionHistory {
    timestamps: BTreeSet<LogTimestamp>,
}

impl PromotionHistory {
    #[must_use]
    pub fn from_timestamps(timestamps: impl IntoIterator<Item = LogTimestamp>) -> Self {
        Self { timestamps: timestamps.into_iter().collect() }
    }

    #[must_use]
    pub fn latest(&self) -> Option<LogTimestamp> {
        self.timestamps.iter().next_back().copied()
    }

    #[must_use]
    pub fn latest_date(&self) -> String {
        self.latest().map_or_else(|| "unknown".to_string(), LogTimestamp::date_string)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = LogTimestamp> + '_ {
        self.timestamps.iter().copied()
    }
}

/// Reconstruct the full promotion timeline of `username` into `role`:
/// rights-change rows from both log sources, deprecated predecessor group
/// names, and the whole rename chain of the account, unioned and
/// deduplicated. A visited set keeps cyclic rename data from looping.
///
/// # Errors
/// Propagates gateway failures; undecodable payload rows are skipped.
pub fn resolve_promotion_history(
    replica: &dyn ReplicaGateway,
    username: &str,
    role: RoleKind,
) -> Result<PromotionHistory, EngineError> {
    let mut timestamps = BTreeSet::new();
    if SYSTEM_ACCOUNTS.contains(&username) {
        return Ok(PromotionHistory { timestamps });
    }

    let mut visited: BTreeSet<String> = BTreeSet::new();
    let mut pending = vec![username.to_string()];

    while let Some(name) = pending.pop() {
        if !visited.insert(name.clone()) {
            continue;
        }

        for group in std::iter::once(role.group()).chain(role.former_groups().iter().copied()) {
            for source in [RightsLogSource::LocalWiki, RightsLogSource::CentralWiki] {
                for row in replica.rights_change_rows(&name, source)? {
                    let Some(delta) = decode_group_delta(&row.params) else {
                        continue;
                    };
                    if delta.grants(group) {
                        timestamps.insert(row.timestamp);
                    }
                }
            }
        }

        if let Some(previous) = previous_username(replica, &name)? {
            if !SYSTEM_ACCOUNTS.contains(&previous.as_str()) {
                pending.push(previous);
            }
        }
    }

    Ok(PromotionHistory { timestamps })
}

/// Resolve the account name this username was renamed from, if any.
///
/// # Errors
/// Propagates gateway failures; undecodable rename payloads are skipped.
pub fn previous_username(
    replica: &dyn ReplicaGateway,
    username: &str,
) -> Result<Option<String>, EngineError> {
    let underscored = username.replace(' ', "_");
    for blob in replica.rename_log_params(username)? {
        let Some(rename) = decode_rename(&blob) else {
            continue;
        };
        if rename.new_name == underscored {
            return Ok(Some(rename.old_name));
        }
    }
    Ok(None)
}

/// One member's base record: raw activity signals plus promotion history.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MemberRecord {
    pub user: UserRecord,
    pub promotions: PromotionHistory,
}

impl MemberRecord {
    /// # Errors
    /// Propagates gateway and remote-lookup failures.
    pub fn fetch(
        replica: &dyn ReplicaGateway,
        activity: &dyn ActivityLookup,
        username: &str,
        role: RoleKind,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            user: UserRecord::fetch(replica, activity, username)?,
            promotions: resolve_promotion_history(replica, username, role)?,
        })
    }

    /// Grace period: the most recent promotion postdates the cutoff.
    #[must_use]
    pub fn freshly_promoted(&self, cutoff: LogTimestamp) -> bool {
        self.promotions.latest().is_some_and(|timestamp| timestamp > cutoff)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct InactivityState {
    pub is_inactive: bool,
    pub is_slipping: bool,
}

/// Lookup-only view of the administrator record linked to a dependent
/// role's member. A missing admin record is non-compliance, not unknown:
/// both flags fail closed to `true`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdminLink {
    pub is_admin: bool,
    pub admin_inactive: bool,
    pub admin_slipping: bool,
}

impl AdminLink {
    #[must_use]
    pub fn resolve(admins: &RoleMembership, username: &str) -> Self {
        match admins.get(username).and_then(RoleMember::classification) {
            Some(state) => Self {
                is_admin: true,
                admin_inactive: state.is_inactive,
                admin_slipping: state.is_slipping,
            },
            None => Self { is_admin: false, admin_inactive: true, admin_slipping: true },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AdminFacts {
    pub log_actions: u64,
    pub log_actions_warn: u64,
    pub property_creations: u64,
    pub property_creations_warn: u64,
}

impl AdminFacts {
    /// # Errors
    /// Propagates gateway failures.
    pub fn fetch(
        replica: &dyn ReplicaGateway,
        username: &str,
        cutoffs: CutoffPair,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            log_actions: replica.logged_action_count(username, ADMIN_LOG_TYPES, cutoffs.cutoff)?,
            log_actions_warn: replica.logged_action_count(
                username,
                ADMIN_LOG_TYPES,
                cutoffs.warn_cutoff,
            )?,
            property_creations: replica.property_creation_count(username, cutoffs.cutoff)?,
            property_creations_warn: replica
                .property_creation_count(username, cutoffs.warn_cutoff)?,
        })
    }

    #[must_use]
    pub fn qualifying(&self) -> u64 {
        self.log_actions + self.property_creations
    }

    #[must_use]
    pub fn qualifying_warn(&self) -> u64 {
        self.log_actions_warn + self.property_creations_warn
    }

    #[must_use]
    pub fn classify(&self, record: &MemberRecord, cutoffs: CutoffPair) -> InactivityState {
        InactivityState {
            is_inactive: !record.freshly_promoted(cutoffs.cutoff)
                && self.qualifying() < ADMIN_MIN_ACTIONS,
            is_slipping: !record.freshly_promoted(cutoffs.warn_cutoff)
                && self.qualifying_warn() < ADMIN_MIN_ACTIONS,
        }
    }

    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.log_actions > 0 {
            parts.push(action_phrase(self.log_actions, "action"));
        }
        if self.property_creations > 0 {
            parts.push(action_phrase(self.property_creations, "property creation"));
        }
        parts.join(", ")
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BureaucratFacts {
    pub admin_actions: u64,
    pub admin_actions_warn: u64,
    /// Group grants/revocations performed by the user; display-only.
    pub group_changes: u64,
    pub link: AdminLink,
}

impl BureaucratFacts {
    /// # Errors
    /// Propagates gateway failures.
    pub fn fetch(
        replica: &dyn ReplicaGateway,
        username: &str,
        cutoffs: CutoffPair,
        link: AdminLink,
    ) -> Result<Self, EngineError> {
        let rows = replica.own_rights_action_rows(username, cutoffs.cutoff)?;
        Ok(Self {
            admin_actions: replica.logged_action_count(username, ADMIN_LOG_TYPES, cutoffs.cutoff)?,
            admin_actions_warn: replica.logged_action_count(
                username,
                ADMIN_LOG_TYPES,
                cutoffs.warn_cutoff,
            )?,
            group_changes: count_group_changes(&rows),
            link,
        })
    }

    /// Inactive when the user's own admin-tier action count is below the
    /// bureaucrat minimum *or* the linked admin record is inactive;
    /// the warn path mirrors this against the warn cutoff.
    #[must_use]
    pub fn classify(&self, record: &MemberRecord, cutoffs: CutoffPair) -> InactivityState {
        InactivityState {
            is_inactive: !record.freshly_promoted(cutoffs.cutoff)
                && (self.admin_actions < BUREAUCRAT_MIN_ACTIONS || self.link.admin_inactive),
            is_slipping: !record.freshly_promoted(cutoffs.warn_cutoff)
                && (self.admin_actions_warn < BUREAUCRAT_MIN_ACTIONS || self.link.admin_slipping),
        }
    }

    #[must_use]
    pub fn summary(&self) -> String {
        if self.admin_actions > 0 {
            action_phrase(self.admin_actions, "action")
        } else {
            String::new()
        }
    }
}

/// Count group transitions a bureaucrat performed: each grantable group
/// appearing in the new set but not the old, and each revocable group
/// appearing in the old set but not the new, counts once.
#[must_use]
pub fn count_group_changes(rows: &[RightsChangeRow]) -> u64 {
    let mut changes = 0;
    for row in rows {
        let Some(delta) = decode_group_delta(&row.params) else {
            continue;
        };
        for group in BUREAUCRAT_GRANTABLE_GROUPS {
            if delta.grants(group) {
                changes += 1;
            }
        }
        for group in BUREAUCRAT_REVOCABLE_GROUPS {
            if delta.revokes(group) {
                changes += 1;
            }
        }
    }
    changes
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InterfaceAdminFacts {
    pub message_edits: u64,
    pub message_edits_warn: u64,
    pub script_edits: u64,
    pub script_edits_warn: u64,
    /// Any-activity signal over the shorter general window; reported
    /// alongside the role-specific classification without feeding it.
    pub general: InactivityState,
}

impl InterfaceAdminFacts {
    /// # Errors
    /// Propagates gateway failures.
    pub fn fetch(
        replica: &dyn ReplicaGateway,
        user: &UserRecord,
        cutoffs: CutoffPair,
        general_cutoffs: CutoffPair,
    ) -> Result<Self, EngineError> {
        let username = user.username.as_str();
        let edits = replica.script_page_edits(username, cutoffs.cutoff)?;
        let edits_warn = replica.script_page_edits(username, cutoffs.warn_cutoff)?;
        Ok(Self {
            message_edits: replica.interface_message_edit_count(username, cutoffs.cutoff)?,
            message_edits_warn: replica
                .interface_message_edit_count(username, cutoffs.warn_cutoff)?,
            script_edits: count_script_edits(&edits, username),
            script_edits_warn: count_script_edits(&edits_warn, username),
            general: InactivityState {
                is_inactive: user
                    .last_activity()
                    .map_or(true, |timestamp| timestamp < general_cutoffs.cutoff),
                is_slipping: user
                    .last_activity()
                    .map_or(true, |timestamp| timestamp < general_cutoffs.warn_cutoff),
            },
        })
    }

    #[must_use]
    pub fn interface_actions(&self) -> u64 {
        self.message_edits + self.script_edits
    }

    #[must_use]
    pub fn interface_actions_warn(&self) -> u64 {
        self.message_edits_warn + self.script_edits_warn
    }

    #[must_use]
    pub fn classify(&self, record: &MemberRecord, cutoffs: CutoffPair) -> InactivityState {
        InactivityState {
            is_inactive: !record.freshly_promoted(cutoffs.cutoff)
                && self.interface_actions() < INTERFACE_ADMIN_MIN_ACTIONS,
            is_slipping: !record.freshly_promoted(cutoffs.warn_cutoff)
                && self.interface_actions_warn() < INTERFACE_ADMIN_MIN_ACTIONS,
        }
    }
}

/// Script/style edits qualifying for the interface-admin count. Edits to
/// the user's own user-space script pages do not qualify.
#[must_use]
pub fn count_script_edits(edits: &[ScriptPageEdit], username: &str) -> u64 {
    let own_prefix = username.replace(' ', "_");
    let mut count = 0;
    for edit in edits {
        if matches!(edit.namespace, 2 | 3) && edit.title.starts_with(&own_prefix) {
            continue;
        }
        count += 1;
    }
    count
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TranslationAdminFacts {
    pub actions: u64,
    pub actions_warn: u64,
}

impl TranslationAdminFacts {
    /// # Errors
    /// Propagates gateway failures.
    pub fn fetch(
        replica: &dyn ReplicaGateway,
        username: &str,
        cutoffs: CutoffPair,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            actions: replica.logged_action_count(
                username,
                TRANSLATION_ADMIN_LOG_TYPES,
                cutoffs.cutoff,
            )?,
            actions_warn: replica.logged_action_count(
                username,
                TRANSLATION_ADMIN_LOG_TYPES,
                cutoffs.warn_cutoff,
            )?,
        })
    }

    #[must_use]
    pub fn classify(&self, record: &MemberRecord, cutoffs: CutoffPair) -> InactivityState {
        InactivityState {
            is_inactive: !record.freshly_promoted(cutoffs.cutoff)
                && self.actions < TRANSLATION_ADMIN_MIN_ACTIONS,
            is_slipping: !record.freshly_promoted(cutoffs.warn_cutoff)
                && self.actions_warn < TRANSLATION_ADMIN_MIN_ACTIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PropertyCreatorFacts {
    pub creations: u64,
    pub creations_warn: u64,
}

impl PropertyCreatorFacts {
    /// # Errors
    /// Propagates gateway failures.
    pub fn fetch(
        replica: &dyn ReplicaGateway,
        username: &str,
        cutoffs: CutoffPair,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            creations: replica.property_creation_count(username, cutoffs.cutoff)?,
            creations_warn: replica.property_creation_count(username, cutoffs.warn_cutoff)?,
        })
    }

    #[must_use]
    pub fn classify(&self, record: &MemberRecord, cutoffs: CutoffPair) -> InactivityState {
        InactivityState {
            is_inactive: !record.freshly_promoted(cutoffs.cutoff)
                && self.creations < PROPERTY_CREATOR_MIN_ACTIONS,
            is_slipping: !record.freshly_promoted(cutoffs.warn_cutoff)
                && self.creations_warn < PROPERTY_CREATOR_MIN_ACTIONS,
        }
    }
}

/// Role-specific facts attached to a member record, tagged by role kind.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoleFacts {
    Admin(AdminFacts),
    Bureaucrat(BureaucratFacts),
    Oversighter { link: AdminLink },
    InterfaceAdmin(InterfaceAdminFacts),
    TranslationAdmin(TranslationAdminFacts),
    PropertyCreator(PropertyCreatorFacts),
    /// Pure membership tiers: edit count and dates only, no policy.
    Membership,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoleMember {
    pub record: MemberRecord,
    pub facts: RoleFacts,
    /// Absent for roles without an inactivity policy.
    pub state: Option<InactivityState>,
    pub freshly_promoted: bool,
}

impl RoleMember {
    #[must_use]
    pub fn classification(&self) -> Option<InactivityState> {
        self.state
    }
}

/// One role tier's evaluated membership, keyed by username. Key order is
/// byte order, matching the identity store's binary collation; a username
/// appears at most once.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoleMembership {
    pub role: RoleKind,
    pub cutoffs: Option<CutoffPair>,
    members: BTreeMap<String, RoleMember>,
}

impl RoleMembership {
    #[must_use]
    pub fn get(&self, username: &str) -> Option<&RoleMember> {
        self.members.get(username)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RoleMember)> {
        self.members.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn report_rows(&self) -> Vec<ReportRow> {
        self.members
            .iter()
            .map(|(username, member)| member_report_row(self.role, username, member))
            .collect()
    }
}

/// Evaluates one role tier at a time: enumerate members, build each record
/// eagerly and strictly sequentially, apply the role's policy. Any query
/// failure aborts the role's evaluation.
pub struct RoleEvaluator<'a> {
    replica: &'a dyn ReplicaGateway,
    activity: &'a dyn ActivityLookup,
}

impl<'a> RoleEvaluator<'a> {
    #[must_use]
    pub fn new(replica: &'a dyn ReplicaGateway, activity: &'a dyn ActivityLookup) -> Self {
        Self { replica, activity }
    }

    /// Evaluate `role` as of `now`. Dependent roles (bureaucrat,
    /// oversighter) require the already-evaluated administrator
    /// membership; passing `None` for them is an error, not a silent
    /// fail-closed sweep.
    ///
    /// # Errors
    /// Returns [`EngineError::MissingDependency`] for a dependent role
    /// without admin membership, and propagates the first gateway or
    /// remote failure (no member is retried, no partial result is kept).
    pub fn evaluate(
        &self,
        role: RoleKind,
        now: OffsetDateTime,
        admins: Option<&RoleMembership>,
    ) -> Result<RoleMembership, EngineError> {
        if role.requires_admin_link() && admins.is_none() {
            return Err(EngineError::MissingDependency(role.as_str()));
        }

        let cutoffs = role.window_months().map(|months| CutoffPair::for_window(now, months));
        let mut members = BTreeMap::new();
        for username in self.replica.group_members(role.group())? {
            let member = self.build_member(role, &username, now, admins)?;
            members.insert(username, member);
        }

        Ok(RoleMembership { role, cutoffs, members })
    }

    fn build_member(
        &self,
        role: RoleKind,
        username: &str,
        now: OffsetDateTime,
        admins: Option<&RoleMembership>,
    ) -> Result<RoleMember, EngineError> {
        let record = MemberRecord::fetch(self.replica, self.activity, username, role)?;

        let (facts, state, freshly_promoted) = match role {
            RoleKind::Administrator => {
                let cutoffs = CutoffPair::for_window(now, ADMIN_WINDOW_MONTHS);
                let facts = AdminFacts::fetch(self.replica, username, cutoffs)?;
                let state = facts.classify(&record, cutoffs);
                (RoleFacts::Admin(facts), Some(state), record.freshly_promoted(cutoffs.cutoff))
            }
            RoleKind::Bureaucrat => {
                let Some(admins) = admins else {
                    return Err(EngineError::MissingDependency(role.as_str()));
                };
                let cutoffs = CutoffPair::for_window(now, BUREAUCRAT_WINDOW_MONTHS);
                let link = AdminLink::resolve(admins, username);
                let facts = BureaucratFacts::fetch(self.replica, username, cutoffs, link)?;
                let state = facts.classify(&record, cutoffs);
                (
                    RoleFacts::Bureaucrat(facts),
                    Some(state),
                    record.freshly_promoted(cutoffs.cutoff),
                )
            }
            RoleKind::Oversighter => {
                let Some(admins) = admins else {
                    return Err(EngineError::MissingDependency(role.as_str()));
                };
                let link = AdminLink::resolve(admins, username);
                (RoleFacts::Oversighter { link }, None, false)
            }
            RoleKind::InterfaceAdmin => {
                let cutoffs = CutoffPair::for_window(now, INTERFACE_ADMIN_WINDOW_MONTHS);
                let general_cutoffs = CutoffPair::for_window(now, GENERAL_ACTIVITY_WINDOW_MONTHS);
                let facts =
                    InterfaceAdminFacts::fetch(self.replica, &record.user, cutoffs, general_cutoffs)?;
                let state = facts.classify(&record, cutoffs);
                (
                    RoleFacts::InterfaceAdmin(facts),
                    Some(state),
                    record.freshly_promoted(cutoffs.cutoff),
                )
            }
            RoleKind::TranslationAdmin => {
                let cutoffs = CutoffPair::for_window(now, TRANSLATION_ADMIN_WINDOW_MONTHS);
                let facts = TranslationAdminFacts::fetch(self.replica, username, cutoffs)?;
                let state = facts.classify(&record, cutoffs);
                (
                    RoleFacts::TranslationAdmin(facts),
                    Some(state),
                    record.freshly_promoted(cutoffs.cutoff),
                )
            }
            RoleKind::PropertyCreator => {
                let cutoffs = CutoffPair::for_window(now, PROPERTY_CREATOR_WINDOW_MONTHS);
                let facts = PropertyCreatorFacts::fetch(self.replica, username, cutoffs)?;
                let state = facts.classify(&record, cutoffs);
                (
                    RoleFacts::PropertyCreator(facts),
                    Some(state),
                    record.freshly_promoted(cutoffs.cutoff),
                )
            }
            RoleKind::Checkuser
            | RoleKind::Bot
            | RoleKind::Flooder
            | RoleKind::IpBlockExempt
            | RoleKind::Rollbacker
            | RoleKind::ConfirmedUser => (RoleFacts::Membership, None, false),
        };

        Ok(RoleMember { record, facts, state, freshly_promoted })
    }
}

/// Presentation hint for one report cell; the classification itself lives
/// in the policy layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CellHighlight {
    None,
    Inactive,
    Slipping,
    FreshlyPromoted,
    NotAdmin,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReportCell {
    pub sort_value: String,
    pub text: String,
    pub highlight: CellHighlight,
}

impl ReportCell {
    fn plain(sort_value: impl Into<String>, text: impl Into<String>) -> Self {
        Self { sort_value: sort_value.into(), text: text.into(), highlight: CellHighlight::None }
    }

    fn highlighted(
        sort_value: impl Into<String>,
        text: impl Into<String>,
        highlight: CellHighlight,
    ) -> Self {
        Self { sort_value: sort_value.into(), text: text.into(), highlight }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReportRow {
    pub username: String,
    pub cells: Vec<ReportCell>,
}

fn member_report_row(role: RoleKind, username: &str, member: &RoleMember) -> ReportRow {
    let mut cells = vec![ReportCell::plain(username, username)];
    cells.push(promotion_cell(member));

    match &member.facts {
        RoleFacts::Admin(facts) => {
            cells.push(ReportCell::highlighted(
                facts.qualifying().to_string(),
                facts.summary(),
                state_highlight(member.state),
            ));
        }
        RoleFacts::Bureaucrat(facts) => {
            cells.push(ReportCell::plain(
                facts.group_changes.to_string(),
                facts.group_changes.to_string(),
            ));
            cells.push(ReportCell::highlighted(
                facts.admin_actions.to_string(),
                facts.summary(),
                state_highlight(member.state),
            ));
            cells.push(admin_link_cell(facts.link));
        }
        RoleFacts::Oversighter { link } => {
            cells.push(admin_link_cell(*link));
        }
        RoleFacts::InterfaceAdmin(facts) => {
            cells.push(ReportCell::highlighted(
                facts.interface_actions().to_string(),
                facts.interface_actions().to_string(),
                state_highlight(member.state),
            ));
            cells.push(general_activity_cell(&member.record.user, facts));
        }
        RoleFacts::TranslationAdmin(facts) => {
            cells.push(ReportCell::highlighted(
                facts.actions.to_string(),
                facts.actions.to_string(),
                state_highlight(member.state),
            ));
            cells.push(last_edit_cell(&member.record.user));
        }
        RoleFacts::PropertyCreator(facts) => {
            cells.push(ReportCell::highlighted(
                facts.creations.to_string(),
                facts.creations.to_string(),
                state_highlight(member.state),
            ));
            cells.push(last_edit_cell(&member.record.user));
        }
        RoleFacts::Membership => {
            if role != RoleKind::Checkuser {
                cells.push(ReportCell::plain(
                    member.record.user.edit_count.to_string(),
                    member.record.user.edit_count.to_string(),
                ));
            }
            cells.push(last_edit_cell(&member.record.user));
        }
    }

    ReportRow { username: username.to_string(), cells }
}

fn promotion_cell(member: &RoleMember) -> ReportCell {
    let highlight = if member.freshly_promoted {
        CellHighlight::FreshlyPromoted
    } else {
        CellHighlight::None
    };
    ReportCell::highlighted(
        member.record.promotions.latest().map(LogTimestamp::compact_string).unwrap_or_default(),
        member.record.promotions.latest_date(),
        highlight,
    )
}

fn last_edit_cell(user: &UserRecord) -> ReportCell {
    ReportCell::plain(
        user.last_edit.map_or_else(|| "0".to_string(), LogTimestamp::compact_string),
        user.last_edit_date(),
    )
}

fn general_activity_cell(user: &UserRecord, facts: &InterfaceAdminFacts) -> ReportCell {
    let highlight = if facts.general.is_inactive {
        CellHighlight::Inactive
    } else if facts.general.is_slipping {
        CellHighlight::Slipping
    } else {
        CellHighlight::None
    };
    ReportCell::highlighted(
        user.last_activity().map_or_else(|| "0".to_string(), LogTimestamp::compact_string),
        if facts.general.is_inactive { "no" } else { "yes" },
        highlight,
    )
}

fn admin_link_cell(link: AdminLink) -> ReportCell {
    let highlight = if !link.is_admin {
        CellHighlight::NotAdmin
    } else if link.admin_inactive {
        CellHighlight::Inactive
    } else if link.admin_slipping {
        CellHighlight::Slipping
    } else {
        CellHighlight::None
    };
    ReportCell::highlighted(
        if link.is_admin { "1" } else { "0" },
        if link.is_admin { "yes" } else { "no" },
        highlight,
    )
}

fn state_highlight(state: Option<InactivityState>) -> CellHighlight {
    match state {
        Some(state) if state.is_inactive => CellHighlight::Inactive,
        Some(state) if state.is_slipping => CellHighlight::Slipping,
        _ => CellHighlight::None,
    }
}

fn action_phrase(count: u64, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}
