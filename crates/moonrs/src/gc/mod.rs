// Generational garbage collector.
//
// Three generations: gen0 (young), gen1 (mesozoic), gen2 (old). Objects are
// born in gen0 except function prototypes, which go straight to gen2.
// Minor collections mark and sweep gen0 only; survivors promote to gen1.
// Major collections mark and sweep everything; gen1 survivors promote to
// gen2. Old objects mutated to reference young ones must pass through the
// write barrier, which queues them as extra roots for the next minor
// collection. All mutation of GC references goes through setters on the
// collector so the barrier cannot be forgotten.
//
// Collection is synchronous and non-reentrant; the interpreter invokes
// `check_gc` between instructions.

mod gc_id;
mod gc_object;
mod object_pool;
mod string_interner;

use std::collections::VecDeque;

use tracing::debug;

pub use gc_id::{ClosureId, FunctionId, GcId, StringId, TableId};
pub use gc_object::{GcBox, GcColour, GcHeader, Generation};
pub use object_pool::{ObjectPool, Pool};
pub use string_interner::StringInterner;

use crate::value::function::{Closure, Function, UpvalueDesc};
use crate::value::table::Table;
use crate::value::{MoonString, Value};

/// Callback enumerating GC roots. The collector hands it a visitor and the
/// traveller invokes the visitor once per root value.
pub type RootTraveller = Box<dyn Fn(&mut dyn FnMut(Value))>;

/// Collection thresholds. A generation whose live count reaches its
/// threshold triggers a collection at the next `check_gc`.
#[derive(Debug, Clone, Copy)]
pub struct GcConfig {
    pub gen0_threshold: usize,
    pub gen1_threshold: usize,
    /// Floor for re-tuned thresholds after a sweep.
    pub min_threshold: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            gen0_threshold: 512,
            gen1_threshold: 512,
            min_threshold: 512,
        }
    }
}

/// One generation: its member list and its collection threshold.
pub struct GenInfo {
    objects: Vec<GcId>,
    pub threshold: usize,
}

impl GenInfo {
    fn new(threshold: usize) -> Self {
        GenInfo {
            objects: Vec::new(),
            threshold,
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.objects.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GcStats {
    pub minor_collections: usize,
    pub major_collections: usize,
    pub objects_collected: usize,
    pub objects_promoted: usize,
}

pub struct GC {
    pool: ObjectPool,
    interner: StringInterner,
    gens: [GenInfo; 3],
    /// FIFO of old objects mutated since the last minor collection.
    barrier: VecDeque<GcId>,
    minor_traveller: Option<RootTraveller>,
    major_traveller: Option<RootTraveller>,
    min_threshold: usize,
    stats: GcStats,
}

impl GC {
    pub fn new(config: GcConfig) -> Self {
        GC {
            pool: ObjectPool::new(),
            interner: StringInterner::new(),
            gens: [
                GenInfo::new(config.gen0_threshold),
                GenInfo::new(config.gen1_threshold),
                GenInfo::new(usize::MAX),
            ],
            barrier: VecDeque::new(),
            minor_traveller: None,
            major_traveller: None,
            min_threshold: config.min_threshold,
            stats: GcStats::default(),
        }
    }

    /// Register the root enumerators used by minor and major collections.
    pub fn set_root_traveller(&mut self, minor: RootTraveller, major: RootTraveller) {
        self.minor_traveller = Some(minor);
        self.major_traveller = Some(major);
    }

    // ============ Allocation ============

    pub fn new_table(&mut self) -> TableId {
        self.new_table_in(Generation::Gen0)
    }

    pub fn new_table_in(&mut self, generation: Generation) -> TableId {
        let id = TableId(self.pool.tables.alloc(Table::new(), generation));
        self.gens[generation as usize].objects.push(GcId::Table(id));
        id
    }

    /// Prototypes live in the old generation from birth: they are immutable
    /// after generation and referenced across generations.
    pub fn new_function(&mut self, line: u32) -> FunctionId {
        self.new_function_in(Generation::Gen2, line)
    }

    pub fn new_function_in(&mut self, generation: Generation, line: u32) -> FunctionId {
        let id = FunctionId(self.pool.functions.alloc(Function::new(line), generation));
        self.gens[generation as usize]
            .objects
            .push(GcId::Function(id));
        id
    }

    pub fn new_closure(&mut self, prototype: FunctionId) -> ClosureId {
        self.new_closure_in(Generation::Gen0, prototype)
    }

    pub fn new_closure_in(&mut self, generation: Generation, prototype: FunctionId) -> ClosureId {
        let id = ClosureId(self.pool.closures.alloc(Closure::new(prototype), generation));
        self.gens[generation as usize]
            .objects
            .push(GcId::Closure(id));
        id
    }

    /// Interning allocator: equal content yields an equal id.
    pub fn new_string(&mut self, s: &str) -> StringId {
        let hash = self.interner.hash(s);
        if let Some(id) = self.interner.find(hash, s, &self.pool) {
            return id;
        }
        let id = StringId(
            self.pool
                .strings
                .alloc(MoonString::new(s, hash), Generation::Gen0),
        );
        self.gens[Generation::Gen0 as usize]
            .objects
            .push(GcId::String(id));
        self.interner.insert(hash, id);
        id
    }

    // ============ Barriered mutation ============

    /// Queue a mutated non-young object as a root for the next minor
    /// collection. Idempotent via the header's barrier bit.
    pub fn set_barrier(&mut self, id: GcId) {
        let Some(header) = self.pool.header_mut(id) else {
            return;
        };
        if header.generation() == Generation::Gen0 || header.is_barriered() {
            return;
        }
        header.set_barriered();
        self.barrier.push_back(id);
    }

    /// Store into a table, applying the write barrier when the entry holds
    /// a GC reference.
    pub fn table_set(&mut self, table: TableId, key: Value, value: Value) {
        if key.as_gc_id().is_some() || value.as_gc_id().is_some() {
            self.set_barrier(GcId::Table(table));
        }
        if let Some(obj) = self.pool.tables.get_mut(table.0) {
            obj.data.set(key, value);
        }
    }

    pub fn table_get(&self, table: TableId, key: &Value) -> Value {
        self.pool
            .tables
            .get(table.0)
            .map(|obj| obj.data.get(key))
            .unwrap_or(Value::Nil)
    }

    /// Add a string constant to a prototype's pool, de-duplicated by id.
    pub fn add_const_string(&mut self, function: FunctionId, s: StringId) -> u32 {
        self.set_barrier(GcId::Function(function));
        self.pool
            .functions
            .get_mut(function.0)
            .map(|obj| obj.data.add_const_string(s))
            .unwrap_or(0)
    }

    /// Add a number constant to a prototype's pool, de-duplicated by value.
    pub fn add_const_number(&mut self, function: FunctionId, n: f64) -> u32 {
        self.pool
            .functions
            .get_mut(function.0)
            .map(|obj| obj.data.add_const_number(n))
            .unwrap_or(0)
    }

    /// Link a child prototype under its superior.
    pub fn add_child_function(&mut self, superior: FunctionId, child: FunctionId) {
        self.set_barrier(GcId::Function(superior));
        if let Some(obj) = self.pool.functions.get_mut(superior.0) {
            obj.data.add_child(child);
        }
        if let Some(obj) = self.pool.functions.get_mut(child.0) {
            obj.data.set_superior(superior);
        }
    }

    pub fn set_module_name(&mut self, function: FunctionId, module: StringId) {
        self.set_barrier(GcId::Function(function));
        if let Some(obj) = self.pool.functions.get_mut(function.0) {
            obj.data.set_module(module);
        }
    }

    /// Upvalue descriptors are plain indices, so no barrier is involved.
    pub fn closure_add_upvalue(&mut self, closure: ClosureId, desc: UpvalueDesc) {
        if let Some(obj) = self.pool.closures.get_mut(closure.0) {
            obj.data.add_upvalue(desc);
        }
    }

    // ============ Collection ============

    /// Run a collection if a generation passed its threshold. Major wins
    /// when both are due.
    pub fn check_gc(&mut self) {
        if self.gens[Generation::Gen1 as usize].count()
            >= self.gens[Generation::Gen1 as usize].threshold
        {
            self.collect_major();
        } else if self.gens[Generation::Gen0 as usize].count()
            >= self.gens[Generation::Gen0 as usize].threshold
        {
            self.collect_minor();
        }
    }

    fn gather_roots(traveller: &Option<RootTraveller>) -> Vec<Value> {
        let mut roots = Vec::new();
        if let Some(traveller) = traveller {
            traveller(&mut |v| roots.push(v));
        }
        roots
    }

    /// Minor collection: mark and sweep gen0 only.
    ///
    /// Roots are the minor traveller's visitations plus every object in the
    /// barrier queue. Marking never traces through old objects: an old
    /// object either sits in the barrier queue (and is a root here) or is
    /// assumed not to reference gen0.
    pub fn collect_minor(&mut self) {
        self.stats.minor_collections += 1;

        for root in Self::gather_roots(&self.minor_traveller) {
            if let Some(id) = root.as_gc_id() {
                self.mark_young(id);
            }
        }
        let barriered: Vec<GcId> = self.barrier.iter().copied().collect();
        for id in barriered {
            for child in self.referenced_ids(id) {
                self.mark_young(child);
            }
        }

        let objects = std::mem::take(&mut self.gens[Generation::Gen0 as usize].objects);
        let mut survived = 0usize;
        let mut collected = 0usize;
        for id in objects {
            let Some(header) = self.pool.header_mut(id) else {
                continue;
            };
            if header.is_black() {
                header.make_white();
                header.set_generation(Generation::Gen1);
                self.gens[Generation::Gen1 as usize].objects.push(id);
                survived += 1;
            } else {
                self.destroy(id);
                collected += 1;
            }
        }
        self.clear_barrier();

        self.gens[Generation::Gen0 as usize].threshold =
            (survived * 2).max(self.min_threshold);
        self.stats.objects_promoted += survived;
        debug!(survived, collected, "minor collection");
    }

    /// Major collection: mark and sweep all three generations.
    pub fn collect_major(&mut self) {
        self.stats.major_collections += 1;

        for root in Self::gather_roots(&self.major_traveller) {
            if let Some(id) = root.as_gc_id() {
                self.mark_all(id);
            }
        }

        // Barrier bits must be cleared before their owners can be swept.
        self.clear_barrier();

        let mut collected = 0usize;
        let mut alive = [0usize; 3];
        for generation in [Generation::Gen0, Generation::Gen1, Generation::Gen2] {
            let objects = std::mem::take(&mut self.gens[generation as usize].objects);
            for id in objects {
                let Some(header) = self.pool.header_mut(id) else {
                    continue;
                };
                if header.is_black() {
                    header.make_white();
                    if generation == Generation::Gen1 {
                        header.set_generation(Generation::Gen2);
                        self.gens[Generation::Gen2 as usize].objects.push(id);
                        self.stats.objects_promoted += 1;
                    } else {
                        self.gens[generation as usize].objects.push(id);
                    }
                    alive[generation as usize] += 1;
                } else {
                    self.destroy(id);
                    collected += 1;
                }
            }
        }

        self.gens[Generation::Gen0 as usize].threshold =
            (alive[Generation::Gen0 as usize] * 2).max(self.min_threshold);
        self.gens[Generation::Gen1 as usize].threshold =
            (alive[Generation::Gen1 as usize] * 2).max(self.min_threshold);
        debug!(
            collected,
            alive_gen0 = alive[0],
            alive_gen1 = alive[1],
            alive_gen2 = alive[2],
            "major collection"
        );
    }

    /// Blacken reachable gen0 objects. Stops at old objects.
    fn mark_young(&mut self, id: GcId) {
        let mut worklist = vec![id];
        while let Some(id) = worklist.pop() {
            let Some(header) = self.pool.header_mut(id) else {
                continue;
            };
            if header.generation() != Generation::Gen0 || header.is_black() {
                continue;
            }
            header.make_black();
            worklist.extend(self.referenced_ids(id));
        }
    }

    /// Blacken every reachable object regardless of generation.
    fn mark_all(&mut self, id: GcId) {
        let mut worklist = vec![id];
        while let Some(id) = worklist.pop() {
            let Some(header) = self.pool.header_mut(id) else {
                continue;
            };
            if header.is_black() {
                continue;
            }
            header.make_black();
            worklist.extend(self.referenced_ids(id));
        }
    }

    /// Direct GC references of one object.
    fn referenced_ids(&self, id: GcId) -> Vec<GcId> {
        match id {
            GcId::String(_) => Vec::new(),
            GcId::Table(TableId(i)) => self
                .pool
                .tables
                .get(i)
                .map(|obj| obj.data.referenced_ids())
                .unwrap_or_default(),
            GcId::Function(FunctionId(i)) => self
                .pool
                .functions
                .get(i)
                .map(|obj| {
                    let f = &obj.data;
                    let mut ids: Vec<GcId> =
                        f.constants().iter().filter_map(|v| v.as_gc_id()).collect();
                    ids.extend(f.children().iter().map(|&c| GcId::Function(c)));
                    if let Some(m) = f.module() {
                        ids.push(GcId::String(m));
                    }
                    if let Some(s) = f.superior() {
                        ids.push(GcId::Function(s));
                    }
                    ids
                })
                .unwrap_or_default(),
            GcId::Closure(ClosureId(i)) => self
                .pool
                .closures
                .get(i)
                .map(|obj| vec![GcId::Function(obj.data.prototype())])
                .unwrap_or_default(),
        }
    }

    fn clear_barrier(&mut self) {
        while let Some(id) = self.barrier.pop_front() {
            if let Some(header) = self.pool.header_mut(id) {
                header.clear_barriered();
            }
        }
    }

    fn destroy(&mut self, id: GcId) {
        match id {
            GcId::String(sid) => {
                self.interner.remove(sid, &self.pool);
                self.pool.strings.free(sid.0);
            }
            GcId::Table(tid) => {
                self.pool.tables.free(tid.0);
            }
            GcId::Function(fid) => {
                self.pool.functions.free(fid.0);
            }
            GcId::Closure(cid) => {
                self.pool.closures.free(cid.0);
            }
        }
        self.stats.objects_collected += 1;
    }

    // ============ Accessors ============

    pub fn string(&self, id: StringId) -> Option<&str> {
        self.pool.strings.get(id.0).map(|obj| obj.data.as_str())
    }

    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.pool.tables.get(id.0).map(|obj| &obj.data)
    }

    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.pool.functions.get(id.0).map(|obj| &obj.data)
    }

    pub(crate) fn function_mut(&mut self, id: FunctionId) -> Option<&mut Function> {
        self.pool.functions.get_mut(id.0).map(|obj| &mut obj.data)
    }

    pub fn closure(&self, id: ClosureId) -> Option<&Closure> {
        self.pool.closures.get(id.0).map(|obj| &obj.data)
    }

    pub fn is_live(&self, id: GcId) -> bool {
        self.pool.is_live(id)
    }

    pub fn generation_of(&self, id: GcId) -> Option<Generation> {
        self.pool.header(id).map(|h| h.generation())
    }

    pub fn gen_count(&self, generation: Generation) -> usize {
        self.gens[generation as usize].count()
    }

    pub fn gen_threshold(&self, generation: Generation) -> usize {
        self.gens[generation as usize].threshold
    }

    pub fn barrier_len(&self) -> usize {
        self.barrier.len()
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Raw pool access. Mutating references through the pool bypasses the
    /// write barrier; only the collector itself and tests may do that.
    pub(crate) fn pool_mut(&mut self) -> &mut ObjectPool {
        &mut self.pool
    }
}

impl Default for GC {
    fn default() -> Self {
        Self::new(GcConfig::default())
    }
}
