//! Identifier types minted by the scheduler.

use crate::define_id;

define_id!(AppId, "app");
define_id!(VersionId, "ver");
define_id!(TaskId, "task");
