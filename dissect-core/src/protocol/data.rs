//! Generic fallback: bytes no dissector claimed.

use crate::context::{DissectionContext, COL_PROTOCOL};
use crate::cursor::ByteCursor;
use crate::error::Result;
use crate::registry::Dissector;
use crate::tree::TreeNode;

/// Records its whole input as one opaque "data" leaf. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataDissector;

impl Dissector for DataDissector {
    fn name(&self) -> &'static str {
        "data"
    }

    fn display_name(&self) -> &'static str {
        "Data"
    }

    fn dissect<'a>(
        &self,
        cursor: ByteCursor<'a>,
        tree: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
    ) -> Result<usize> {
        tree.add_unparsed(&cursor, 0);
        if ctx.columns().protocol().is_empty() {
            ctx.columns_mut().set(COL_PROTOCOL, self.display_name());
        }
        Ok(cursor.reported_len())
    }
}
