//! Program-image node-section parsing (§6 of the design spec).
//!
//! The full program image also carries predicate, rule, and bytecode
//! sections; those belong to the external bytecode loader and are never
//! touched here. This module reads just enough of the header to recover the
//! node table the registry needs to come up: the magic identifier, the
//! version pair, and the definition-count byte are skipped verbatim (their
//! validation, if any, is the external loader's job), then `num_nodes` and
//! the `(fake_id, user_id)` pairs are read in native byte order, matching
//! the original `database::database(filename)` constructor this crate's
//! registry replaces.
//!
//! The image's `fake_id`s are carried through verbatim as the real map key
//! they are in `database::database`'s `nodes[fake_id] = user_id` — nothing
//! here assumes they arrive dense or in ascending order, since the format
//! itself places no such requirement on them.

use std::io::Read;
use std::mem::size_of;

use crate::error::LoadError;
use crate::node::NodeId;

/// Size in bytes of the magic identifier at the start of a program image.
pub const MAGIC_SIZE: usize = 8;

/// The node table recovered from a program image's header: each entry is a
/// `(fake_id, translated_id)` pair exactly as read off the wire, in file
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTable {
    pub nodes: Vec<(NodeId, NodeId)>,
}

fn read_exact_or_truncated(r: &mut impl Read, buf: &mut [u8]) -> Result<(), LoadError> {
    let mut read = 0;
    while read < buf.len() {
        let n = r.read(&mut buf[read..]).map_err(LoadError::Io)?;
        if n == 0 {
            tracing::warn!(expected = buf.len() - read, "loader_truncated_read");
            return Err(LoadError::Truncated { expected: buf.len() - read, found: 0 });
        }
        read += n;
    }
    Ok(())
}

fn read_u32(r: &mut impl Read) -> Result<u32, LoadError> {
    let mut buf = [0u8; size_of::<u32>()];
    read_exact_or_truncated(r, &mut buf)?;
    Ok(u32::from_ne_bytes(buf))
}

/// Parses the node section of a program image, skipping the magic, version,
/// and definition-count fields ahead of it.
///
/// Fatal on truncation or a zero-node image, per §7's error handling design:
/// there is no partial or retriable outcome for a malformed image.
pub fn load_node_table(mut reader: impl Read) -> Result<NodeTable, LoadError> {
    let mut magic = [0u8; MAGIC_SIZE];
    read_exact_or_truncated(&mut reader, &mut magic)?;

    // Version: two u32s, skipped.
    read_u32(&mut reader)?;
    read_u32(&mut reader)?;

    // Number of definitions: one byte, skipped.
    let mut defs = [0u8; 1];
    read_exact_or_truncated(&mut reader, &mut defs)?;

    let num_nodes = read_u32(&mut reader)? as usize;
    if num_nodes == 0 {
        return Err(LoadError::ZeroNodes);
    }

    let mut nodes = Vec::with_capacity(num_nodes);
    for _ in 0..num_nodes {
        let fake_id = read_u32(&mut reader)?;
        let user_id = read_u32(&mut reader)?;
        nodes.push((fake_id, user_id));
    }

    tracing::debug!(num_nodes, "loader_parsed_node_table");
    Ok(NodeTable { nodes })
}
