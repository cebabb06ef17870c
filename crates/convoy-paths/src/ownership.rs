//! Grid ownership: which profile's cached grids another profile reuses.

use convoy_core::{ProfileId, ProfileSet};

/// Maps every profile to the owner whose grids it shares.
///
/// Profiles whose traversal rules are cost-equivalent collapse onto the
/// first registered member of their class, so the number of built grids
/// scales with distinct cost classes rather than with profiles. Owners map
/// to themselves.
#[derive(Clone, Debug)]
pub struct OwnershipRegistry {
    owners: Vec<ProfileId>,
    active: Vec<bool>,
}

/// Result of [`OwnershipRegistry::deactivate`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Deactivation {
    /// The profile was a dependent; nothing moved.
    Dependent,
    /// The profile owned grids nobody else uses.
    LoneOwner,
    /// Ownership moved from the removed profile to `to`.
    Transferred { from: ProfileId, to: ProfileId },
}

impl OwnershipRegistry {
    pub fn new(profiles: &ProfileSet) -> Self {
        let mut owners: Vec<ProfileId> = Vec::with_capacity(profiles.len());
        for profile in profiles.iter() {
            let owner = owners
                .iter()
                .enumerate()
                .filter(|&(i, o)| o.index() == i)
                .map(|(_, &o)| o)
                .find(|&o| profiles[o].shares_costs_with(profile))
                .unwrap_or(profile.id);
            owners.push(owner);
        }
        Self {
            active: vec![true; owners.len()],
            owners,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    #[inline]
    pub fn get_owner(&self, profile: ProfileId) -> ProfileId {
        self.owners[profile.index()]
    }

    #[inline]
    pub fn is_owner(&self, profile: ProfileId) -> bool {
        self.get_owner(profile) == profile
    }

    #[inline]
    pub fn is_active(&self, profile: ProfileId) -> bool {
        self.active[profile.index()]
    }

    /// Active profiles sharing `owner`'s grids, excluding the owner.
    pub fn dependents(&self, owner: ProfileId) -> Vec<ProfileId> {
        self.owners
            .iter()
            .enumerate()
            .filter(|&(i, &o)| o == owner && i != owner.index() && self.active[i])
            .map(|(i, _)| ProfileId(i as u16))
            .collect()
    }

    /// Make `new_owner` the owner of its current class. Every profile that
    /// resolved to the old owner, the old owner included, now resolves to
    /// `new_owner`. Returns the old owner, or `None` when `new_owner`
    /// already owns its class.
    pub fn transfer_ownership(&mut self, new_owner: ProfileId) -> Option<ProfileId> {
        let old = self.get_owner(new_owner);
        if old == new_owner {
            return None;
        }
        for o in self.owners.iter_mut() {
            if *o == old {
                *o = new_owner;
            }
        }
        Some(old)
    }

    /// Mark a profile as gone from the map. An owner with active dependents
    /// hands ownership to the first of them; an owner without dependents is
    /// left alone since there is nothing to transfer to.
    pub fn deactivate(&mut self, profile: ProfileId) -> Deactivation {
        self.active[profile.index()] = false;
        if !self.is_owner(profile) {
            return Deactivation::Dependent;
        }
        match self.dependents(profile).first() {
            Some(&to) => {
                self.transfer_ownership(to);
                Deactivation::Transferred { from: profile, to }
            }
            None => Deactivation::LoneOwner,
        }
    }

    /// Bring a profile back; it keeps resolving to its current owner.
    pub fn activate(&mut self, profile: ProfileId) {
        self.active[profile.index()] = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::VehicleProfile;

    fn set() -> (ProfileSet, [ProfileId; 4]) {
        let mut s = ProfileSet::new();
        let a = s.register(VehicleProfile::builder("a").terrain_cost("mud", 30)).unwrap();
        let b = s.register(VehicleProfile::builder("b").terrain_cost("mud", 30).footprint(3, 3)).unwrap();
        let c = s.register(VehicleProfile::builder("c")).unwrap();
        let d = s.register(VehicleProfile::builder("d").terrain_cost("mud", 30)).unwrap();
        (s, [a, b, c, d])
    }

    #[test]
    fn equivalent_profiles_share_first_owner() {
        let (s, [a, b, c, d]) = set();
        let reg = OwnershipRegistry::new(&s);
        assert_eq!(reg.get_owner(a), a);
        assert_eq!(reg.get_owner(b), a);
        assert_eq!(reg.get_owner(c), c);
        assert_eq!(reg.get_owner(d), a);
        assert_eq!(reg.dependents(a), vec![b, d]);
        assert!(reg.dependents(c).is_empty());
    }

    #[test]
    fn owner_resolution_is_idempotent() {
        let (s, ids) = set();
        let mut reg = OwnershipRegistry::new(&s);
        reg.transfer_ownership(ids[3]);
        for p in ids {
            let o = reg.get_owner(p);
            assert_eq!(reg.get_owner(o), o);
        }
    }

    #[test]
    fn transfer_rebinds_all_dependents() {
        let (s, [a, b, _c, d]) = set();
        let mut reg = OwnershipRegistry::new(&s);
        assert_eq!(reg.transfer_ownership(b), Some(a));
        assert_eq!(reg.get_owner(a), b);
        assert_eq!(reg.get_owner(d), b);
        assert!(reg.is_owner(b));
        assert_eq!(reg.transfer_ownership(b), None);
    }

    #[test]
    fn deactivating_owner_hands_over() {
        let (s, [a, b, c, d]) = set();
        let mut reg = OwnershipRegistry::new(&s);
        assert_eq!(reg.deactivate(c), Deactivation::LoneOwner);
        assert_eq!(reg.deactivate(d), Deactivation::Dependent);
        assert_eq!(reg.deactivate(a), Deactivation::Transferred { from: a, to: b });
        assert!(reg.is_owner(b));
        // b has no active dependents left.
        assert_eq!(reg.deactivate(b), Deactivation::LoneOwner);
    }
}
