mod handle_table;
mod on_drop;
mod unsettled;

pub(crate) use handle_table::HandleTable;
pub(crate) use on_drop::OnDrop;
pub(crate) use unsettled::UnsettledMap;
