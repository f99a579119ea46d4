/// Membership Engine: Code Allocator
///
/// Zones are numbered per (church, district), family groups per zone.
/// The next number is one past the larger of the scope's member count and
/// its highest number already issued, so numbers never repeat inside a
/// scope even after members are moved out. Inactive members still count.
///
/// Allocation reads inside the caller's transaction. Concurrent writers
/// are serialized by the store; a collision that slips through surfaces
/// as a retryable `StorageError` conflict from the unique index.

use crate::domain::{normalize_label, Allocation, Level, ScopeKey};
use crate::error::{EngineError, Result, StorageError};
use crate::ids::checked_next;
use crate::store::GraphRead;

/// Next free number inside `scope` for nodes of `level`.
pub fn next_number<R: GraphRead + ?Sized>(read: &R, level: Level, scope: &ScopeKey) -> Result<u32> {
    let members = read.list_by_scope(level, scope)?;
    let highest = members
        .iter()
        .filter_map(|n| n.allocation.as_ref().map(|a| a.number))
        .max()
        .unwrap_or(0);
    let count = u32::try_from(members.len())
        .map_err(|_| StorageError::database(format!("scope {} too large", scope.as_key())))?;
    checked_next(count.max(highest))
}

/// Allocate a code for a new member of `scope`.
///
/// Codes are `{DISTRICT}-{n}` for zones and `{ZONE_NAME}-{n}` for
/// family groups, labels upper-cased with blanks turned into `_`.
pub fn allocate<R: GraphRead + ?Sized>(read: &R, level: Level, scope: &ScopeKey) -> Result<Allocation> {
    if scope.numbered_level() != level {
        return Err(EngineError::InvalidInput(format!(
            "scope {} cannot number a {}",
            scope.as_key(),
            level
        )));
    }
    let scope = scope.normalized();

    let label = match &scope {
        ScopeKey::ChurchDistrict { district, .. } => district.clone(),
        ScopeKey::Zone { zone_id } => {
            let zone = read
                .get_by_id(Level::Zone, zone_id)?
                .ok_or_else(|| EngineError::not_found(Level::Zone, zone_id.as_str()))?;
            if !zone.is_active() {
                return Err(EngineError::inactive(Level::Zone, zone_id.as_str()));
            }
            normalize_label(&zone.profile.display_name())
        }
    };

    let number = next_number(read, level, &scope)?;
    Ok(Allocation {
        code: format!("{}-{}", label, number),
        scope,
        number,
    })
}
