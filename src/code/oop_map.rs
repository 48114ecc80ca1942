/// Where a reference lives in a compiled frame at a safepoint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OopMapLocation {
    /// A machine register, by the VM's register number.
    Register(u16),
    /// A stack slot, as a byte offset from the stack pointer.
    Stack(i32),
}

/// What kind of value a location holds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OopMapValueKind {
    /// A reference to a managed object.
    Oop,
    /// A compressed reference to a managed object.
    NarrowOop,
    /// A callee-saved register spilled by this frame, holding the caller's value.
    CalleeSaved,
    /// A pointer derived from the reference in the given base location.
    Derived { base: OopMapLocation },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OopMapValue {
    pub location: OopMapLocation,
    pub kind: OopMapValueKind,
}

/// The reference-holding locations of a frame at one safepoint of a compiled method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OopMap {
    pc_offset: u32,
    values: Vec<OopMapValue>,
}

impl OopMap {
    pub fn new(pc_offset: u32) -> Self {
        OopMap {
            pc_offset,
            values: vec![],
        }
    }

    pub fn set(&mut self, location: OopMapLocation, kind: OopMapValueKind) {
        self.values.push(OopMapValue { location, kind });
    }

    pub fn pc_offset(&self) -> u32 {
        self.pc_offset
    }

    pub fn values(&self) -> &[OopMapValue] {
        &self.values
    }

    /// Locations that hold references the collector must visit or update.
    pub fn oops(&self) -> impl Iterator<Item = &OopMapValue> {
        self.values
            .iter()
            .filter(|v| matches!(v.kind, OopMapValueKind::Oop | OopMapValueKind::NarrowOop))
    }
}

/// All the oop maps of one blob, ordered by pc offset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OopMapSet {
    maps: Vec<OopMap>,
}

impl OopMapSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the map for a safepoint. Maps may be added in any order. A second map for the
    /// same pc offset replaces the first.
    pub fn add(&mut self, map: OopMap) {
        match self
            .maps
            .binary_search_by_key(&map.pc_offset, |m| m.pc_offset)
        {
            Ok(i) => self.maps[i] = map,
            Err(i) => self.maps.insert(i, map),
        }
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OopMap> {
        self.maps.iter()
    }

    /// The map recorded for exactly `pc_offset`.
    pub fn find_map_at_offset(&self, pc_offset: u32) -> Option<&OopMap> {
        self.maps
            .binary_search_by_key(&pc_offset, |m| m.pc_offset)
            .ok()
            .map(|i| &self.maps[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_offset() {
        let mut set = OopMapSet::new();
        let mut late = OopMap::new(40);
        late.set(OopMapLocation::Stack(16), OopMapValueKind::Oop);
        late.set(OopMapLocation::Register(3), OopMapValueKind::CalleeSaved);
        set.add(late);
        let mut early = OopMap::new(8);
        early.set(OopMapLocation::Register(1), OopMapValueKind::NarrowOop);
        set.add(early);

        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().map(|m| m.pc_offset()).collect::<Vec<_>>(), vec![8, 40]);
        let found = set.find_map_at_offset(40).unwrap();
        assert_eq!(found.oops().count(), 1);
        assert!(set.find_map_at_offset(41).is_none());
    }
}
