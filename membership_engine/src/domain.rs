/// Membership Engine: Core Domain Types
///
/// Pure data plus the static shape of the hierarchy: which slots each
/// level carries, which it inherits from its superior, and which slot
/// names its superior. No store access, no mutation logic.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ── Levels and slots ───────────────────────────────────────────────

/// One kind of node in the organizational graph.
///
/// Church..Disciple are hierarchy levels; Zone and FamilyGroup are
/// groupings whose "superior" is the node responsible for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Church,
    Pastor,
    Copastor,
    Supervisor,
    Preacher,
    Disciple,
    Zone,
    FamilyGroup,
}

/// A reference column on a node. Each slot holds the id of a node of
/// the matching level, or nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Church,
    Pastor,
    Copastor,
    Supervisor,
    Preacher,
    Zone,
    FamilyGroup,
}

impl Slot {
    pub const ALL: [Slot; 7] = [
        Slot::Church,
        Slot::Pastor,
        Slot::Copastor,
        Slot::Supervisor,
        Slot::Preacher,
        Slot::Zone,
        Slot::FamilyGroup,
    ];

    /// The level of the node this slot points at.
    pub fn target_level(&self) -> Level {
        match self {
            Slot::Church => Level::Church,
            Slot::Pastor => Level::Pastor,
            Slot::Copastor => Level::Copastor,
            Slot::Supervisor => Level::Supervisor,
            Slot::Preacher => Level::Preacher,
            Slot::Zone => Level::Zone,
            Slot::FamilyGroup => Level::FamilyGroup,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Church => "church",
            Slot::Pastor => "pastor",
            Slot::Copastor => "copastor",
            Slot::Supervisor => "supervisor",
            Slot::Preacher => "preacher",
            Slot::Zone => "zone",
            Slot::FamilyGroup => "family_group",
        }
    }

    /// Slots that describe the leadership chain, as opposed to grouping
    /// membership (Zone, FamilyGroup).
    pub fn is_hierarchy(&self) -> bool {
        !matches!(self, Slot::Zone | Slot::FamilyGroup)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Level {
    pub const ALL: [Level; 8] = [
        Level::Church,
        Level::Pastor,
        Level::Copastor,
        Level::Supervisor,
        Level::Preacher,
        Level::Disciple,
        Level::Zone,
        Level::FamilyGroup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Church => "church",
            Level::Pastor => "pastor",
            Level::Copastor => "copastor",
            Level::Supervisor => "supervisor",
            Level::Preacher => "preacher",
            Level::Disciple => "disciple",
            Level::Zone => "zone",
            Level::FamilyGroup => "family_group",
        }
    }

    pub fn is_grouping(&self) -> bool {
        matches!(self, Level::Zone | Level::FamilyGroup)
    }

    /// Whether nodes of this level wrap a Person record.
    pub fn has_person(&self) -> bool {
        matches!(
            self,
            Level::Pastor | Level::Copastor | Level::Supervisor | Level::Preacher | Level::Disciple
        )
    }

    /// The slot other nodes use to point at a node of this level.
    /// Disciples are never referenced.
    pub fn own_slot(&self) -> Option<Slot> {
        match self {
            Level::Church => Some(Slot::Church),
            Level::Pastor => Some(Slot::Pastor),
            Level::Copastor => Some(Slot::Copastor),
            Level::Supervisor => Some(Slot::Supervisor),
            Level::Preacher => Some(Slot::Preacher),
            Level::Disciple => None,
            Level::Zone => Some(Slot::Zone),
            Level::FamilyGroup => Some(Slot::FamilyGroup),
        }
    }

    /// The slot holding this node's direct superior (the responsible
    /// node for groupings, the mother church for churches).
    pub fn superior_slot(&self) -> Slot {
        match self {
            Level::Church => Slot::Church,
            Level::Pastor => Slot::Church,
            Level::Copastor => Slot::Pastor,
            Level::Supervisor => Slot::Copastor,
            Level::Preacher => Slot::Supervisor,
            Level::Disciple => Slot::Preacher,
            Level::Zone => Slot::Supervisor,
            Level::FamilyGroup => Slot::Preacher,
        }
    }

    pub fn superior_level(&self) -> Level {
        self.superior_slot().target_level()
    }

    /// Every slot a node of this level may hold. Others stay null.
    pub fn carried_slots(&self) -> &'static [Slot] {
        match self {
            Level::Church => &[Slot::Church],
            Level::Pastor => &[Slot::Church],
            Level::Copastor => &[Slot::Church, Slot::Pastor],
            Level::Supervisor => &[Slot::Church, Slot::Pastor, Slot::Copastor, Slot::Zone],
            Level::Preacher => &[
                Slot::Church,
                Slot::Pastor,
                Slot::Copastor,
                Slot::Supervisor,
                Slot::Zone,
                Slot::FamilyGroup,
            ],
            Level::Disciple => &Slot::ALL,
            Level::Zone => &[Slot::Church, Slot::Pastor, Slot::Copastor, Slot::Supervisor],
            Level::FamilyGroup => &[
                Slot::Church,
                Slot::Pastor,
                Slot::Copastor,
                Slot::Supervisor,
                Slot::Preacher,
                Slot::Zone,
            ],
        }
    }

    pub fn carries(&self, slot: Slot) -> bool {
        self.carried_slots().contains(&slot)
    }

    /// Slots copied verbatim from the direct superior's links. The
    /// superior slot itself is excluded (it is set to the superior's id).
    pub fn inherited_slots(&self) -> &'static [Slot] {
        match self {
            Level::Church | Level::Pastor => &[],
            Level::Copastor => &[Slot::Church],
            Level::Supervisor => &[Slot::Church, Slot::Pastor],
            Level::Preacher => &[Slot::Church, Slot::Pastor, Slot::Copastor, Slot::Zone],
            Level::Disciple => &[
                Slot::Church,
                Slot::Pastor,
                Slot::Copastor,
                Slot::Supervisor,
                Slot::Zone,
                Slot::FamilyGroup,
            ],
            Level::Zone => &[Slot::Pastor, Slot::Copastor],
            Level::FamilyGroup => &[Slot::Church, Slot::Pastor, Slot::Copastor, Slot::Supervisor],
        }
    }

    /// The slot written by a grouping assignment rather than inherited:
    /// a Supervisor's Zone, a Preacher's FamilyGroup.
    pub fn grouping_link(&self) -> Option<Slot> {
        match self {
            Level::Supervisor => Some(Slot::Zone),
            Level::Preacher => Some(Slot::FamilyGroup),
            _ => None,
        }
    }

    /// The grouping level this level can be responsible for.
    pub fn led_grouping(&self) -> Option<Level> {
        self.grouping_link().map(|s| s.target_level())
    }

    /// The slot that anchors a grouping to the scope its code was
    /// allocated in. Never written by the cascade.
    pub fn scope_slot(&self) -> Option<Slot> {
        match self {
            Level::Zone => Some(Slot::Church),
            Level::FamilyGroup => Some(Slot::Zone),
            _ => None,
        }
    }

    /// Hierarchy levels whose direct superior is this level. Groupings
    /// are reached separately through `led_grouping`. Anexe churches do
    /// not inherit from their mother church, so Church only lists Pastor.
    pub fn child_levels(&self) -> &'static [Level] {
        match self {
            Level::Church => &[Level::Pastor],
            Level::Pastor => &[Level::Copastor],
            Level::Copastor => &[Level::Supervisor],
            Level::Supervisor => &[Level::Preacher],
            Level::Preacher => &[Level::Disciple],
            Level::Disciple | Level::Zone | Level::FamilyGroup => &[],
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .iter()
            .find(|l| l.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown level {:?}", s))
    }
}

// ── Links ──────────────────────────────────────────────────────────

/// The reference columns of a node: its direct superior plus the
/// denormalized ancestor and grouping references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Links {
    pub church: Option<String>,
    pub pastor: Option<String>,
    pub copastor: Option<String>,
    pub supervisor: Option<String>,
    pub preacher: Option<String>,
    pub zone: Option<String>,
    pub family_group: Option<String>,
}

impl Links {
    pub fn get(&self, slot: Slot) -> Option<&str> {
        let v = match slot {
            Slot::Church => &self.church,
            Slot::Pastor => &self.pastor,
            Slot::Copastor => &self.copastor,
            Slot::Supervisor => &self.supervisor,
            Slot::Preacher => &self.preacher,
            Slot::Zone => &self.zone,
            Slot::FamilyGroup => &self.family_group,
        };
        v.as_deref()
    }

    pub fn set(&mut self, slot: Slot, value: Option<String>) {
        let v = match slot {
            Slot::Church => &mut self.church,
            Slot::Pastor => &mut self.pastor,
            Slot::Copastor => &mut self.copastor,
            Slot::Supervisor => &mut self.supervisor,
            Slot::Preacher => &mut self.preacher,
            Slot::Zone => &mut self.zone,
            Slot::FamilyGroup => &mut self.family_group,
        };
        *v = value;
    }

    pub fn with(mut self, slot: Slot, value: Option<String>) -> Self {
        self.set(slot, value);
        self
    }

    /// Links a node of `level` should hold when its direct superior is
    /// `superior_id` with links `superior`. Only the superior slot and
    /// the inherited slots are overwritten; everything else is kept.
    pub fn inherit_from(&self, level: Level, superior_id: &str, superior: &Links) -> Links {
        let mut next = self.clone();
        for slot in level.inherited_slots() {
            next.set(*slot, superior.get(*slot).map(str::to_string));
        }
        next.set(level.superior_slot(), Some(superior_id.to_string()));
        next
    }

    /// Slots whose value differs between `self` and `other`, in slot order.
    pub fn diff(&self, other: &Links) -> Vec<(Slot, Option<String>)> {
        Slot::ALL
            .iter()
            .filter(|s| self.get(**s) != other.get(**s))
            .map(|s| (*s, other.get(*s).map(str::to_string)))
            .collect()
    }
}

// ── Status and attachment ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    Inactive,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RecordStatus::Active),
            "inactive" => Ok(RecordStatus::Inactive),
            other => Err(format!("unknown status {:?}", other)),
        }
    }
}

/// Sub-state of an active node. `PartiallyDetached` is a valid state
/// that asks for a manual reassignment; it is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attachment {
    FullyAttached,
    PartiallyDetached,
}

// ── Scopes ─────────────────────────────────────────────────────────

/// The unit a grouping code is allocated within.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScopeKey {
    /// Zones are numbered per church and district.
    ChurchDistrict { church_id: String, district: String },
    /// Family groups are numbered per zone.
    Zone { zone_id: String },
}

impl ScopeKey {
    pub fn church_district(church_id: impl Into<String>, district: &str) -> Self {
        ScopeKey::ChurchDistrict {
            church_id: church_id.into(),
            district: normalize_label(district),
        }
    }

    pub fn zone(zone_id: impl Into<String>) -> Self {
        ScopeKey::Zone {
            zone_id: zone_id.into(),
        }
    }

    /// Same scope with the district label normalized, for keys that
    /// arrived from outside the engine.
    pub fn normalized(&self) -> Self {
        match self {
            ScopeKey::ChurchDistrict {
                church_id,
                district,
            } => ScopeKey::church_district(church_id.clone(), district),
            ScopeKey::Zone { zone_id } => ScopeKey::zone(zone_id.clone()),
        }
    }

    /// The node the scope is anchored to: the church or the zone.
    pub fn anchor_id(&self) -> &str {
        match self {
            ScopeKey::ChurchDistrict { church_id, .. } => church_id,
            ScopeKey::Zone { zone_id } => zone_id,
        }
    }

    /// The grouping level numbered within this kind of scope.
    pub fn numbered_level(&self) -> Level {
        match self {
            ScopeKey::ChurchDistrict { .. } => Level::Zone,
            ScopeKey::Zone { .. } => Level::FamilyGroup,
        }
    }

    /// Flat string form used as an index key by stores.
    pub fn as_key(&self) -> String {
        match self {
            ScopeKey::ChurchDistrict {
                church_id,
                district,
            } => format!("church:{}:{}", church_id, district),
            ScopeKey::Zone { zone_id } => format!("zone:{}", zone_id),
        }
    }

    pub fn parse_key(key: &str) -> Option<Self> {
        if let Some(rest) = key.strip_prefix("zone:") {
            return Some(ScopeKey::zone(rest));
        }
        let rest = key.strip_prefix("church:")?;
        let (church_id, district) = rest.split_once(':')?;
        Some(ScopeKey::ChurchDistrict {
            church_id: church_id.to_string(),
            district: district.to_string(),
        })
    }
}

/// Upper-case, underscore-separated form used in codes and scope keys.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_uppercase()
}

// ── Profiles ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaritalStatus {
    Single,
    Married,
    Widowed,
    Divorced,
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Residence {
    pub country: String,
    pub department: String,
    pub province: String,
    pub district: String,
    pub urban_sector: String,
    pub address: String,
    #[serde(default)]
    pub reference: Option<String>,
}

/// Demographic and contact record wrapped by every hierarchy level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub first_names: String,
    pub last_names: String,
    pub gender: Gender,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub marital_status: Option<MaritalStatus>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub residence: Residence,
}

impl Person {
    pub fn new(first_names: impl Into<String>, last_names: impl Into<String>, gender: Gender) -> Self {
        Self {
            first_names: first_names.into(),
            last_names: last_names.into(),
            gender,
            birth_date: None,
            marital_status: None,
            email: None,
            phone: None,
            residence: Residence::default(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_names, self.last_names)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChurchProfile {
    pub name: String,
    pub abbreviated_name: String,
    #[serde(default)]
    pub founding_date: Option<NaiveDate>,
    #[serde(default)]
    pub service_times: Vec<String>,
    #[serde(default)]
    pub address: Residence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneProfile {
    pub name: String,
    pub district: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyGroupProfile {
    pub name: String,
    #[serde(default)]
    pub service_time: Option<String>,
    #[serde(default)]
    pub address: Residence,
}

/// Level-specific attributes. The variant must match the node's level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Profile {
    Church(ChurchProfile),
    Person(Person),
    Zone(ZoneProfile),
    FamilyGroup(FamilyGroupProfile),
}

impl Profile {
    pub fn fits(&self, level: Level) -> bool {
        match self {
            Profile::Church(_) => level == Level::Church,
            Profile::Person(_) => level.has_person(),
            Profile::Zone(_) => level == Level::Zone,
            Profile::FamilyGroup(_) => level == Level::FamilyGroup,
        }
    }

    pub fn person(&self) -> Option<&Person> {
        match self {
            Profile::Person(p) => Some(p),
            _ => None,
        }
    }

    /// Human label: church/zone/group name or the person's full name.
    pub fn display_name(&self) -> String {
        match self {
            Profile::Church(c) => c.name.clone(),
            Profile::Person(p) => p.full_name(),
            Profile::Zone(z) => z.name.clone(),
            Profile::FamilyGroup(g) => g.name.clone(),
        }
    }
}

// ── Audit stamps ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamp {
    pub at: DateTime<Utc>,
    pub by: String,
}

impl AuditStamp {
    pub fn now(actor: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            by: actor.into(),
        }
    }
}

// ── Nodes ──────────────────────────────────────────────────────────

/// Code allocated to a grouping inside its scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub scope: ScopeKey,
    pub number: u32,
    pub code: String,
}

/// One record of the organizational graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub level: Level,
    pub status: RecordStatus,
    pub links: Links,
    pub profile: Profile,
    #[serde(default)]
    pub allocation: Option<Allocation>,
    pub created: AuditStamp,
    #[serde(default)]
    pub updated: Option<AuditStamp>,
}

impl Node {
    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }

    /// Id of the direct superior, if attached. A church's superior is
    /// its mother church.
    pub fn superior_id(&self) -> Option<&str> {
        self.links.get(self.level.superior_slot())
    }

    pub fn link(&self, slot: Slot) -> Option<&str> {
        self.links.get(slot)
    }

    pub fn code(&self) -> Option<&str> {
        self.allocation.as_ref().map(|a| a.code.as_str())
    }
}

/// Caller-supplied data for a new node. The id is generated when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDraft {
    #[serde(default)]
    pub id: Option<String>,
    pub profile: Profile,
}

impl NodeDraft {
    pub fn new(profile: Profile) -> Self {
        Self { id: None, profile }
    }

    pub fn with_id(id: impl Into<String>, profile: Profile) -> Self {
        Self {
            id: Some(id.into()),
            profile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inherited_slots_are_carried() {
        for level in Level::ALL {
            for slot in level.inherited_slots() {
                assert!(level.carries(*slot), "{} inherits uncarried {}", level, slot);
            }
            assert!(level.carries(level.superior_slot()));
        }
    }

    #[test]
    fn test_child_levels_point_back() {
        for level in Level::ALL {
            for child in level.child_levels() {
                assert_eq!(child.superior_level(), level);
            }
        }
    }

    #[test]
    fn test_inherit_from_overwrites_only_inherited() {
        let supervisor = Links {
            church: Some("c1".into()),
            pastor: Some("p1".into()),
            copastor: Some("cp1".into()),
            zone: Some("z1".into()),
            ..Default::default()
        };
        let preacher = Links {
            family_group: Some("fg1".into()),
            ..Default::default()
        };
        let next = preacher.inherit_from(Level::Preacher, "sv1", &supervisor);
        assert_eq!(next.supervisor.as_deref(), Some("sv1"));
        assert_eq!(next.copastor.as_deref(), Some("cp1"));
        assert_eq!(next.zone.as_deref(), Some("z1"));
        assert_eq!(next.family_group.as_deref(), Some("fg1"));
    }

    #[test]
    fn test_scope_key_round_trip() {
        let k = ScopeKey::church_district("c1", "san  isidro");
        assert_eq!(k.as_key(), "church:c1:SAN_ISIDRO");
        assert_eq!(ScopeKey::parse_key(&k.as_key()), Some(k));
        let z = ScopeKey::zone("z9");
        assert_eq!(ScopeKey::parse_key("zone:z9"), Some(z));
        assert_eq!(ScopeKey::parse_key("bogus"), None);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("family_group".parse::<Level>(), Ok(Level::FamilyGroup));
        assert!("bishop".parse::<Level>().is_err());
    }
}
