use ahash::RandomState;
use indexmap::IndexMap;

use crate::gc::gc_id::{ClosureId, FunctionId, GcId, StringId, TableId};
use crate::gc::gc_object::{GcBox, GcHeader, Generation};
use crate::value::function::{Closure, Function};
use crate::value::table::Table;
use crate::value::MoonString;

/// IndexMap-backed pool for one kind of GC object.
///
/// - O(1) lookup by id
/// - O(live_objects) iteration (no empty slots)
/// - Free list recycles ids so long-running programs do not exhaust `u32`
pub struct Pool<T> {
    map: IndexMap<u32, GcBox<T>, RandomState>,
    free_list: Vec<u32>,
    next_id: u32,
}

impl<T> Pool<T> {
    pub fn new() -> Self {
        Pool {
            map: IndexMap::with_hasher(RandomState::new()),
            free_list: Vec::new(),
            next_id: 0,
        }
    }

    pub fn alloc(&mut self, data: T, generation: Generation) -> u32 {
        let id = if let Some(free_id) = self.free_list.pop() {
            free_id
        } else {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            debug_assert!(self.next_id != 0, "pool exhausted u32 ids");
            id
        };
        self.map.insert(id, GcBox::new(data, generation));
        id
    }

    #[inline(always)]
    pub fn get(&self, id: u32) -> Option<&GcBox<T>> {
        self.map.get(&id)
    }

    #[inline(always)]
    pub fn get_mut(&mut self, id: u32) -> Option<&mut GcBox<T>> {
        self.map.get_mut(&id)
    }

    /// Free a slot and recycle its id. Returns true if the slot was live.
    pub fn free(&mut self, id: u32) -> bool {
        if self.map.swap_remove(&id).is_some() {
            self.free_list.push(id);
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &GcBox<T>)> + '_ {
        self.map.iter().map(|(&id, obj)| (id, obj))
    }
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// All GC-managed objects, one pool per kind.
pub struct ObjectPool {
    pub strings: Pool<MoonString>,
    pub tables: Pool<Table>,
    pub functions: Pool<Function>,
    pub closures: Pool<Closure>,
}

impl ObjectPool {
    pub fn new() -> Self {
        ObjectPool {
            strings: Pool::new(),
            tables: Pool::new(),
            functions: Pool::new(),
            closures: Pool::new(),
        }
    }

    /// Header of any live object, regardless of kind.
    pub fn header(&self, id: GcId) -> Option<&GcHeader> {
        match id {
            GcId::String(StringId(i)) => self.strings.get(i).map(|o| &o.header),
            GcId::Table(TableId(i)) => self.tables.get(i).map(|o| &o.header),
            GcId::Function(FunctionId(i)) => self.functions.get(i).map(|o| &o.header),
            GcId::Closure(ClosureId(i)) => self.closures.get(i).map(|o| &o.header),
        }
    }

    pub fn header_mut(&mut self, id: GcId) -> Option<&mut GcHeader> {
        match id {
            GcId::String(StringId(i)) => self.strings.get_mut(i).map(|o| &mut o.header),
            GcId::Table(TableId(i)) => self.tables.get_mut(i).map(|o| &mut o.header),
            GcId::Function(FunctionId(i)) => self.functions.get_mut(i).map(|o| &mut o.header),
            GcId::Closure(ClosureId(i)) => self.closures.get_mut(i).map(|o| &mut o.header),
        }
    }

    pub fn is_live(&self, id: GcId) -> bool {
        self.header(id).is_some()
    }
}

impl Default for ObjectPool {
    fn default() -> Self {
        Self::new()
    }
}
