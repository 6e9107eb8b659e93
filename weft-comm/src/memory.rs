use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Registry of process-local byte buffers keyed by advertised address.
/// Remote puts land in, and remote gets read from, registered buffers; the
/// address is what travels in the envelope.
#[derive(Default)]
pub struct AddressSpace {
    slots: Mutex<HashMap<u64, Vec<u8>>>,
}

impl AddressSpace {
    pub fn register(&self, addr: u64, size: usize) {
        let mut slots = self.slots.lock().expect("address space lock poisoned");
        slots.insert(addr, vec![0; size]);
    }

    pub fn write(&self, addr: u64, bytes: &[u8]) {
        let mut slots = self.slots.lock().expect("address space lock poisoned");
        let slot = slots
            .get_mut(&addr)
            .unwrap_or_else(|| panic!("write to unregistered address {addr:#x}"));
        assert!(
            bytes.len() <= slot.len(),
            "write of {} bytes into {}-byte buffer at {addr:#x}",
            bytes.len(),
            slot.len()
        );
        slot[..bytes.len()].copy_from_slice(bytes);
    }

    pub fn read(&self, addr: u64, len: usize) -> Vec<u8> {
        let slots = self.slots.lock().expect("address space lock poisoned");
        let slot = slots
            .get(&addr)
            .unwrap_or_else(|| panic!("read from unregistered address {addr:#x}"));
        assert!(len <= slot.len());
        slot[..len].to_vec()
    }
}

pub type FnId = u32;

pub type CommFn = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Indexed registry of remotely invocable functions; the id is what
/// travels in a fork envelope.
#[derive(Default)]
pub struct FnTable {
    fns: RwLock<Vec<CommFn>>,
}

impl FnTable {
    pub fn register<F>(&self, f: F) -> FnId
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let mut fns = self.fns.write().expect("function table lock poisoned");
        fns.push(Arc::new(f));
        (fns.len() - 1) as FnId
    }

    pub fn get(&self, id: FnId) -> CommFn {
        let fns = self.fns.read().expect("function table lock poisoned");
        fns.get(id as usize)
            .unwrap_or_else(|| panic!("unknown function id {id}"))
            .clone()
    }
}

/// Process-wide indexed table of per-locale private slots, the landing
/// zone for broadcast-private messages (verbose-comm and diagnostics
/// toggles live in the two reserved slots).
#[derive(Default)]
pub struct PrivateTable {
    slots: Mutex<Vec<Vec<u8>>>,
}

impl PrivateTable {
    pub fn register(&self, initial: Vec<u8>) -> usize {
        let mut slots = self.slots.lock().expect("private table lock poisoned");
        slots.push(initial);
        slots.len() - 1
    }

    pub fn read(&self, index: usize) -> Vec<u8> {
        let slots = self.slots.lock().expect("private table lock poisoned");
        slots
            .get(index)
            .unwrap_or_else(|| panic!("unknown private slot {index}"))
            .clone()
    }

    pub fn write(&self, index: usize, bytes: &[u8]) {
        let mut slots = self.slots.lock().expect("private table lock poisoned");
        let slot = slots
            .get_mut(index)
            .unwrap_or_else(|| panic!("unknown private slot {index}"));
        slot.clear();
        slot.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.slots.lock().expect("private table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registration-ordered table of process-wide globals. Order matters:
/// broadcast receivers demultiplex purely by position.
#[derive(Default)]
pub struct GlobalsRegistry {
    cells: Mutex<Vec<Vec<u8>>>,
}

impl GlobalsRegistry {
    pub fn register(&self, initial: Vec<u8>) -> usize {
        let mut cells = self.cells.lock().expect("globals registry lock poisoned");
        cells.push(initial);
        cells.len() - 1
    }

    pub fn len(&self) -> usize {
        self.cells.lock().expect("globals registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read(&self, index: usize) -> Vec<u8> {
        let cells = self.cells.lock().expect("globals registry lock poisoned");
        cells
            .get(index)
            .unwrap_or_else(|| panic!("unknown global {index}"))
            .clone()
    }

    pub fn write(&self, index: usize, bytes: &[u8]) {
        let mut cells = self.cells.lock().expect("globals registry lock poisoned");
        let cell = cells
            .get_mut(index)
            .unwrap_or_else(|| panic!("unknown global {index}"));
        cell.clear();
        cell.extend_from_slice(bytes);
    }
}
