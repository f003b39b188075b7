/// Typed indices into the GC object pools.
///
/// Ids are plain `u32` newtypes so a [`Value`](crate::Value) stays `Copy`;
/// the pool owns the object, ids never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClosureId(pub u32);

/// Unified GC object identifier, tagging the id with its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcId {
    String(StringId),
    Table(TableId),
    Function(FunctionId),
    Closure(ClosureId),
}

impl From<StringId> for GcId {
    fn from(id: StringId) -> Self {
        GcId::String(id)
    }
}

impl From<TableId> for GcId {
    fn from(id: TableId) -> Self {
        GcId::Table(id)
    }
}

impl From<FunctionId> for GcId {
    fn from(id: FunctionId) -> Self {
        GcId::Function(id)
    }
}

impl From<ClosureId> for GcId {
    fn from(id: ClosureId) -> Self {
        GcId::Closure(id)
    }
}
