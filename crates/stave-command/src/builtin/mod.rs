//! Builtin commands.
//!
//! Property edits, structural edits on owned children, and a few
//! domain-aware commands for automation lanes and measures.

mod automation;
mod property;
mod structure;

pub use automation::{AddControlPoint, MoveControlPoint, SetTimeSignature};
pub use property::{
    DeleteListValue, InsertListValue, Rename, ReplaceListValue, SetProperty, SetReference,
};
pub use structure::{DeleteChild, DuplicateChild, InsertChild, MoveChild};

use stave_pool::{FieldKind, Pool};
use stave_types::NodeId;

use crate::error::{CommandError, CommandResult};
use crate::registry::CommandRegistry;

pub(crate) fn register_all(registry: &mut CommandRegistry) {
    registry
        .register::<Rename>()
        .register::<SetProperty>()
        .register::<SetReference>()
        .register::<InsertListValue>()
        .register::<DeleteListValue>()
        .register::<ReplaceListValue>()
        .register::<InsertChild>()
        .register::<DeleteChild>()
        .register::<MoveChild>()
        .register::<DuplicateChild>()
        .register::<AddControlPoint>()
        .register::<MoveControlPoint>()
        .register::<SetTimeSignature>();
}

/// Kind of `field` on the target, or a validation failure naming `command`.
fn field_kind(pool: &Pool, target: NodeId, field: &str, command: &str) -> CommandResult<FieldKind> {
    let class = pool.get(target)?.class();
    class
        .schema()
        .field(field)
        .map(|(_, spec)| spec.kind)
        .ok_or_else(|| CommandError::rejected(command, format!("{class} has no field {field:?}")))
}

/// Reject `index` unless it lies in `[0, len]` (inclusive) or `[0, len)`.
fn check_index(command: &str, index: usize, len: usize, inclusive: bool) -> CommandResult<()> {
    let ok = if inclusive { index <= len } else { index < len };
    if ok {
        return Ok(());
    }
    let range = if inclusive {
        format!("[0, {len}]")
    } else {
        format!("[0, {len})")
    };
    Err(CommandError::rejected(
        command,
        format!("index {index} out of bounds {range}"),
    ))
}
