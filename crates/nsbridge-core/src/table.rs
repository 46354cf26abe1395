//! Handle table.
//!
//! A fixed-capacity arena of per-handle entries indexed by the slot index the
//! secure side encodes in each handle. A slot stores the full handle word, and
//! lookups compare the whole word, so a handle that outlived its `close` (or
//! belongs to another family) never resolves to the slot's current occupant.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use nsbridge_proto::HandleId;

use crate::{
    config::ReturnBehavior, error::DriverError, family::Family, power::PowerManager,
    relay::Relay, sync::Timeout,
};

/// Non-secure state of one open handle.
pub(crate) struct Entry<F: Family, P> {
    pub(crate) handle: HandleId,
    pub(crate) behavior: ReturnBehavior<F>,
    pub(crate) timeout: Timeout,
    pub(crate) relay: Arc<Relay<F, P>>,
}

pub(crate) struct HandleTable<F: Family, P> {
    slots: RwLock<Vec<Option<Arc<Entry<F, P>>>>>,
}

impl<F: Family, P> HandleTable<F, P> {
    pub(crate) fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots: RwLock::new(slots) }
    }

    /// Store `entry` in the slot its handle names.
    pub(crate) fn insert(&self, entry: Entry<F, P>) -> Result<Arc<Entry<F, P>>, DriverError> {
        let handle = entry.handle;
        if handle.family() != F::ID {
            return Err(DriverError::InvalidHandle(handle));
        }

        let mut slots = self.write();
        let slot = slots.get_mut(handle.index()).ok_or(DriverError::InvalidHandle(handle))?;
        if slot.is_some() {
            return Err(DriverError::SlotOccupied(handle));
        }
        let entry = Arc::new(entry);
        *slot = Some(Arc::clone(&entry));
        Ok(entry)
    }

    /// Entry of a live handle.
    pub(crate) fn get(&self, handle: HandleId) -> Result<Arc<Entry<F, P>>, DriverError> {
        self.read()
            .get(handle.index())
            .and_then(Option::as_ref)
            .filter(|entry| entry.handle == handle)
            .map(Arc::clone)
            .ok_or(DriverError::InvalidHandle(handle))
    }

    /// Remove and return the entry of a live handle.
    pub(crate) fn remove(&self, handle: HandleId) -> Result<Arc<Entry<F, P>>, DriverError> {
        let mut slots = self.write();
        let slot = slots.get_mut(handle.index()).ok_or(DriverError::InvalidHandle(handle))?;
        if slot.as_ref().is_some_and(|entry| entry.handle == handle) {
            slot.take().ok_or(DriverError::InvalidHandle(handle))
        } else {
            Err(DriverError::InvalidHandle(handle))
        }
    }

    /// Number of live handles.
    pub(crate) fn len(&self) -> usize {
        self.read().iter().filter(|slot| slot.is_some()).count()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.read().len()
    }

    /// Operations in flight summed over live handles.
    pub(crate) fn in_flight(&self) -> usize
    where
        P: PowerManager,
    {
        self.read().iter().flatten().map(|entry| entry.relay.in_flight()).sum()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Option<Arc<Entry<F, P>>>>> {
        #[allow(clippy::expect_used)]
        self.slots.read().expect("handle table lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Option<Arc<Entry<F, P>>>>> {
        #[allow(clippy::expect_used)]
        self.slots.write().expect("handle table lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use nsbridge_proto::{FamilyId, MessageType};

    use super::*;
    use crate::{
        power::{RefCountPower, Resource},
        sync::AccessLock,
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Msg {
        Open,
        Construct,
        Close,
        Register,
        Cancel,
    }

    impl MessageType for Msg {
        const FAMILY: &'static str = "TABLE";
        const OPEN: Self = Self::Open;
        const CONSTRUCT: Self = Self::Construct;
        const CLOSE: Self = Self::Close;
        const REGISTER_CALLBACK: Self = Self::Register;
        const CANCEL_OPERATION: Self = Self::Cancel;

        fn code(self) -> u8 {
            self as u8
        }

        fn from_code(code: u8) -> Option<Self> {
            [Self::Open, Self::Construct, Self::Close, Self::Register, Self::Cancel]
                .into_iter()
                .find(|msg| msg.code() == code)
        }
    }

    struct Fam;

    impl Family for Fam {
        const NAME: &'static str = "TABLE";
        const ID: FamilyId = FamilyId::AES_CBC;
        const RESOURCE: Resource = Resource::Crypto;
        type MsgType = Msg;
        type Operation = ();
        type Params = ();
    }

    fn entry(handle: HandleId) -> Entry<Fam, RefCountPower> {
        Entry {
            handle,
            behavior: ReturnBehavior::Polling,
            timeout: Timeout::NoWait,
            relay: Arc::new(Relay::new(
                handle,
                &ReturnBehavior::Polling,
                RefCountPower::new(),
                AccessLock::new(),
            )),
        }
    }

    #[test]
    fn stale_generation_does_not_resolve() {
        let table = HandleTable::<Fam, RefCountPower>::new(4);
        let old = HandleId::new(Fam::ID, 1, 2);
        let new = HandleId::new(Fam::ID, 2, 2);

        table.insert(entry(old)).unwrap();
        table.remove(old).unwrap();
        table.insert(entry(new)).unwrap();

        assert_eq!(table.get(old).err(), Some(DriverError::InvalidHandle(old)));
        assert!(table.get(new).is_ok());
    }

    #[test]
    fn occupied_slot_is_refused() {
        let table = HandleTable::<Fam, RefCountPower>::new(4);
        let first = HandleId::new(Fam::ID, 0, 1);
        let second = HandleId::new(Fam::ID, 1, 1);

        table.insert(entry(first)).unwrap();

        assert_eq!(table.insert(entry(second)).err(), Some(DriverError::SlotOccupied(second)));
    }

    #[test]
    fn out_of_range_and_foreign_handles_are_invalid() {
        let table = HandleTable::<Fam, RefCountPower>::new(2);
        let beyond = HandleId::new(Fam::ID, 0, 5);
        let foreign = HandleId::new(FamilyId::SHA2, 0, 0);

        assert_eq!(table.insert(entry(beyond)).err(), Some(DriverError::InvalidHandle(beyond)));
        assert_eq!(table.insert(entry(foreign)).err(), Some(DriverError::InvalidHandle(foreign)));
        assert_eq!(table.len(), 0);
        assert_eq!(table.capacity(), 2);
    }

    #[test]
    fn remove_twice_fails() {
        let table = HandleTable::<Fam, RefCountPower>::new(2);
        let handle = HandleId::new(Fam::ID, 3, 0);

        table.insert(entry(handle)).unwrap();
        table.remove(handle).unwrap();

        assert_eq!(table.remove(handle).err(), Some(DriverError::InvalidHandle(handle)));
    }
}
