// src/core/pipeline.rs

//! The pipelining engine: buffers commands, fans the batch out per node,
//! gathers replies, and merges them back into submission order.

use crate::client::Request;
use crate::core::ClientError;
use crate::core::cluster::{NodeId, Route, RoutedNode};
use crate::core::protocol::{RespFrame, RespValue};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::debug;

/// One buffered command: its submission ordinal, target node, encoded
/// request, and whether it sits inside a MULTI/EXEC block.
#[derive(Debug)]
struct PipelineEntry {
    ordinal: u64,
    node: RoutedNode,
    request: RespFrame,
    inside_transaction: bool,
}

/// A deferred batch of commands.
///
/// Commands are routed at [`add`](Pipeline::add) time, so a cross-slot key
/// set inside one command fails before any bytes are written, while commands
/// targeting different slots across entries are legal. Replies are re-sorted
/// to submission order regardless of how entries were partitioned across
/// nodes.
pub struct Pipeline {
    router: Arc<dyn Route>,
    entries: Vec<PipelineEntry>,
    /// When set, `MULTI`, the `QUEUED` echoes, and nothing else are filtered
    /// from the merged replies; the `EXEC` result array is kept.
    filter_multi_exec: bool,
    in_transaction: bool,
    next_ordinal: u64,
}

impl Pipeline {
    pub fn new(router: Arc<dyn Route>, filter_multi_exec: bool) -> Self {
        Self {
            router,
            entries: Vec::new(),
            filter_multi_exec,
            in_transaction: false,
            next_ordinal: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Routes and buffers one command.
    pub async fn add(&mut self, request: Request) -> Result<(), ClientError> {
        let node = self
            .router
            .route(request.keys(), request.is_write(), false)
            .await?;

        let name = request.name_uppercase();
        let inside_transaction = match name.as_str() {
            // The transaction scaffolding itself: MULTI opens the block and
            // is droppable, EXEC closes it and carries the result array.
            "MULTI" => {
                self.in_transaction = true;
                true
            }
            "EXEC" => {
                self.in_transaction = false;
                false
            }
            _ => self.in_transaction,
        };

        self.entries.push(PipelineEntry {
            ordinal: self.next_ordinal,
            node,
            request: request.into_frame(),
            inside_transaction,
        });
        self.next_ordinal += 1;
        Ok(())
    }

    /// Flushes the buffer: per-node batches are issued under each node's
    /// connection mutex (chunked by `batch_size` when given), replies are
    /// read in issue order per node, then merged by ordinal. The buffer is
    /// cleared.
    pub async fn flush(
        &mut self,
        batch_size: Option<usize>,
    ) -> Result<Vec<RespValue>, ClientError> {
        let entries = std::mem::take(&mut self.entries);
        self.in_transaction = false;
        self.next_ordinal = 1;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        // Fail before any write if a target connection is in subscriber mode.
        for entry in &entries {
            if entry.node.conn.is_subscribed() {
                return Err(ClientError::SubscribedConnection);
            }
        }

        // Group per node, preserving per-node submission order.
        let mut per_node: IndexMap<NodeId, (RoutedNode, Vec<(u64, bool, RespFrame)>)> =
            IndexMap::new();
        for entry in entries {
            per_node
                .entry(entry.node.id.clone())
                .or_insert_with(|| (entry.node.clone(), Vec::new()))
                .1
                .push((entry.ordinal, entry.inside_transaction, entry.request));
        }

        let mut merged: Vec<(u64, bool, RespValue)> = Vec::new();
        for (node_id, (node, batch)) in per_node {
            let frames: Vec<RespFrame> = batch.iter().map(|(_, _, f)| f.clone()).collect();
            debug!(node = %node_id, commands = frames.len(), "flushing pipeline batch");
            let replies = node.conn.pipeline_exchange(&frames, batch_size).await?;
            for ((ordinal, inside, _), reply) in batch.into_iter().zip(replies) {
                merged.push((ordinal, inside, RespValue::from(reply)));
            }
        }

        // Reconstruct user submission order, then drop transaction
        // scaffolding replies when filtering is on.
        merged.sort_unstable_by_key(|(ordinal, _, _)| *ordinal);
        Ok(merged
            .into_iter()
            .filter(|(_, inside, _)| !self.filter_multi_exec || !inside)
            .map(|(_, _, value)| value)
            .collect())
    }
}
