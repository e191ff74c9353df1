//! Persistent job catalog: jobs (JID), directory names (DNB), file masks
//! (FMD) and passwords (PWB). Each file carries the common header and is
//! replaced as a whole on rebuild.

pub mod dnb;
pub mod fmd;
pub mod jid;
pub mod pwb;

pub use dnb::{Dnb, DNB_SPEC};
pub use fmd::{FileMask, Fmd, FMD_SPEC};
pub use jid::{Jid, JobDef, JobRec, JID_SPEC};
pub use pwb::{PwEntry, Pwb, PwbLayout};
