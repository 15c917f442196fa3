use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
};

use indexmap::IndexMap;
use memcave_core::{MemoryAccess, Va};

use crate::Error;

const ALLOCATION_BASE: u64 = 0x1000_0000;
const ALLOCATION_GRANULARITY: u64 = 0x1000;

struct Region {
    data: Vec<u8>,
    access: MemoryAccess,
    allocated: bool,
}

impl Region {
    fn end(&self, base: u64) -> u64 {
        base + self.data.len() as u64
    }
}

#[derive(Default)]
struct Faults {
    refuse_allocation: bool,
    write_limit: Option<usize>,
}

pub struct MemoryDriver {
    regions: RefCell<BTreeMap<u64, Region>>,
    modules: RefCell<IndexMap<String, Va>>,
    next_allocation: Cell<u64>,
    exited: Cell<bool>,
    faults: RefCell<Faults>,
    allocations: Cell<usize>,
    frees: Cell<usize>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            regions: RefCell::new(BTreeMap::new()),
            modules: RefCell::new(IndexMap::new()),
            next_allocation: Cell::new(ALLOCATION_BASE),
            exited: Cell::new(false),
            faults: RefCell::new(Faults::default()),
            allocations: Cell::new(0),
            frees: Cell::new(0),
        }
    }

    fn check_alive(&self) -> Result<(), Error> {
        if self.exited.get() {
            return Err(Error::ProcessExited);
        }

        Ok(())
    }

    pub fn map(&self, address: Va, data: Vec<u8>, access: MemoryAccess) -> Result<(), Error> {
        let mut regions = self.regions.borrow_mut();
        let end = address.0 + data.len() as u64;

        let overlaps = regions
            .range(..end)
            .next_back()
            .is_some_and(|(&base, region)| region.end(base) > address.0);

        if overlaps {
            return Err(Error::Overlap(address));
        }

        tracing::trace!(%address, size = data.len(), %access, "mapped region");
        regions.insert(
            address.0,
            Region {
                data,
                access,
                allocated: false,
            },
        );
        Ok(())
    }

    pub fn add_module(&self, name: &str, base: Va) {
        self.modules.borrow_mut().insert(name.to_ascii_lowercase(), base);
    }

    pub fn module_base(&self, name: &str) -> Result<Option<Va>, Error> {
        self.check_alive()?;
        Ok(self
            .modules
            .borrow()
            .get(&name.to_ascii_lowercase())
            .copied())
    }

    /// Copies between `address` and the region containing it. Transfers stop
    /// at the end of that region.
    fn transfer(&self, address: Va, len: usize, mut copy: impl FnMut(&mut [u8], usize)) -> usize {
        let mut regions = self.regions.borrow_mut();

        let (base, region) = match regions.range_mut(..=address.0).next_back() {
            Some((&base, region)) if address.0 < region.end(base) => (base, region),
            _ => return 0,
        };

        let start = (address.0 - base) as usize;
        let count = len.min(region.data.len() - start);
        copy(&mut region.data[start..start + count], count);
        count
    }

    pub fn read_memory(&self, address: Va, buffer: &mut [u8]) -> Result<usize, Error> {
        self.check_alive()?;
        Ok(self.transfer(address, buffer.len(), |region, count| {
            buffer[..count].copy_from_slice(region)
        }))
    }

    pub fn write_memory(&self, address: Va, data: &[u8]) -> Result<usize, Error> {
        self.check_alive()?;

        let limit = self.faults.borrow().write_limit.unwrap_or(data.len());
        let data = &data[..data.len().min(limit)];

        Ok(self.transfer(address, data.len(), |region, count| {
            region.copy_from_slice(&data[..count])
        }))
    }

    pub fn allocate(&self, size: u64, access: MemoryAccess) -> Result<Va, Error> {
        self.check_alive()?;
        self.allocations.set(self.allocations.get() + 1);

        if self.faults.borrow().refuse_allocation || size == 0 {
            return Ok(Va(0));
        }

        let address = self.next_allocation.get();
        let reserved = size.div_ceil(ALLOCATION_GRANULARITY) * ALLOCATION_GRANULARITY;
        self.next_allocation.set(address + reserved);

        self.regions.borrow_mut().insert(
            address,
            Region {
                data: vec![0u8; size as usize],
                access,
                allocated: true,
            },
        );

        Ok(Va(address))
    }

    pub fn free(&self, address: Va) -> Result<(), Error> {
        self.check_alive()?;

        let mut regions = self.regions.borrow_mut();
        if !regions.get(&address.0).is_some_and(|region| region.allocated) {
            return Err(Error::NotAllocated(address));
        }

        regions.remove(&address.0);
        self.frees.set(self.frees.get() + 1);
        Ok(())
    }

    pub fn has_exited(&self) -> bool {
        self.exited.get()
    }

    pub fn set_exited(&self, exited: bool) {
        self.exited.set(exited);
    }

    pub fn refuse_allocations(&self, refuse: bool) {
        self.faults.borrow_mut().refuse_allocation = refuse;
    }

    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.faults.borrow_mut().write_limit = limit;
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.get()
    }

    pub fn free_count(&self) -> usize {
        self.frees.get()
    }

    pub fn live_allocations(&self) -> Vec<(Va, usize)> {
        self.regions
            .borrow()
            .iter()
            .filter(|(_, region)| region.allocated)
            .map(|(&base, region)| (Va(base), region.data.len()))
            .collect()
    }

    pub fn protection(&self, address: Va) -> Option<MemoryAccess> {
        let regions = self.regions.borrow();
        let (&base, region) = regions.range(..=address.0).next_back()?;
        (address.0 < region.end(base)).then_some(region.access)
    }
}
