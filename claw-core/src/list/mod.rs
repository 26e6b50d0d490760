// List containers (C3, spec.md §4.3): four concrete shapes sharing a
// read contract (length, index-get, cancellable range-iterate) plus,
// for the mutable side, append/set/size. Kept as four small types
// rather than one enum-of-storage so each can pick the layout that's
// actually cheap for its element kind.

pub mod bits;
pub mod bytes;
pub mod numeric;
pub mod structlist;

pub use bits::BoolList;
pub use bytes::ByteEntryList;
pub use numeric::{NumericList, WireNumeric};
pub use structlist::StructList;
