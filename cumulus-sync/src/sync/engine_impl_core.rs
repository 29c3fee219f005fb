impl SyncEngine {
    async fn read_state_cache(&mut self, index: &mut FsidIndex) -> Result<(), EngineError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let rows = store.load_all().await?;
        if rows.is_empty() {
            return Ok(());
        }

        let mut by_parent: HashMap<u32, Vec<(u32, CachedNode)>> = HashMap::new();
        for (id, data) in rows {
            match CachedNode::deserialize(&data) {
                Some(cached) => by_parent.entry(cached.parent_db_id).or_default().push((id, cached)),
                None => {
                    warn!(row = id, "dropping unreadable state-cache row");
                    self.deleteq.insert(id);
                }
            }
        }

        self.attach_cached_children(index, 0, self.root, &mut by_parent, 100);

        // rows whose parent never showed up cannot be placed; purge them
        for bucket in by_parent.values() {
            for (id, cached) in bucket {
                warn!(row = id, name = %cached.local_name, "dropping orphaned state-cache row");
                self.deleteq.insert(*id);
            }
        }

        info!(
            tag = self.config.tag,
            nodes = self.nodes.len() - 1,
            "state cache loaded"
        );
        Ok(())
    }

    fn attach_cached_children(
        &mut self,
        index: &mut FsidIndex,
        parent_db_id: u32,
        parent: NodeId,
        by_parent: &mut HashMap<u32, Vec<(u32, CachedNode)>>,
        depth: u32,
    ) {
        if depth == 0 {
            return;
        }
        let Some(bucket) = by_parent.remove(&parent_db_id) else {
            return;
        };
        let cmp = self.cmp;
        for (db_id, cached) in bucket {
            let short_in_db = cached.short_name_in_db;
            let mut node = cached.into_node();
            node.db_id = db_id;
            node.scan_seq_no = self.scan_seq_no;
            let fs_id = node.fs_id;
            self.register_counts(node.kind, node.size);
            let id = self.nodes.insert(node);
            self.nodes.attach(&cmp, parent, id);
            if fs_id != UNDEF {
                set_fsid(&mut self.nodes, index, self.config.tag, id, fs_id);
            }
            if !short_in_db {
                // row from an old format: look the short name up once and
                // queue the node for re-persistence
                let path = self.nodes.full_path(&self.config.local_root, self.root, id);
                self.nodes[id].short_name = fs::short_name(&path);
                self.nodes[id].short_name_in_db = true;
                self.statecacheadd(id);
            }
            self.attach_cached_children(index, db_id, id, by_parent, depth - 1);
        }
    }

    fn register_counts(&mut self, kind: NodeKind, size: i64) {
        match kind {
            NodeKind::File => {
                self.file_count += 1;
                self.local_bytes += size.max(0);
            }
            NodeKind::Folder => self.folder_count += 1,
        }
    }

    fn unregister_counts(&mut self, kind: NodeKind, size: i64) {
        match kind {
            NodeKind::File => {
                self.file_count = self.file_count.saturating_sub(1);
                self.local_bytes -= size.max(0);
            }
            NodeKind::Folder => self.folder_count = self.folder_count.saturating_sub(1),
        }
    }

    /// Queues a node for persistence on the next batch commit.
    fn statecacheadd(&mut self, id: NodeId) {
        if self.state == SyncState::Canceled {
            return;
        }
        if let Some(node) = self.nodes.get(id)
            && node.db_id != 0
        {
            self.deleteq.remove(&node.db_id);
        }
        self.insertq.insert(id);
    }

    /// Queues a node's row for deletion on the next batch commit.
    fn statecachedel(&mut self, id: NodeId) {
        if self.state == SyncState::Canceled {
            return;
        }
        self.insertq.remove(&id);
        if let Some(node) = self.nodes.get(id)
            && node.db_id != 0
        {
            self.deleteq.insert(node.db_id);
        }
    }

    /// Commits the batched additions and deletions in one transaction.
    /// Additions are retried until every pending node has a parent with a
    /// committed row id; whatever remains is carried to the next commit. A
    /// failed commit keeps the in-memory queues so the write is re-attempted
    /// on the next cycle.
    async fn cachenodes(&mut self) -> Result<(), EngineError> {
        let Some(store) = &mut self.store else {
            return Ok(());
        };
        let flush = matches!(self.state, SyncState::Active)
            || (matches!(self.state, SyncState::InitialScan)
                && self.insertq.len() > INITIAL_SCAN_FLUSH_THRESHOLD);
        if !flush || (self.insertq.is_empty() && self.deleteq.is_empty()) {
            return Ok(());
        }

        debug!(
            additions = self.insertq.len(),
            deletions = self.deleteq.len(),
            "saving sync-node state cache"
        );

        let mut puts: Vec<(u32, Vec<u8>)> = Vec::new();
        let mut put_ids: Vec<NodeId> = Vec::new();
        loop {
            let mut added = false;
            for id in self.insertq.clone() {
                let Some(node) = self.nodes.get(id) else {
                    self.insertq.remove(&id);
                    continue;
                };
                let parent_ready = match node.parent {
                    Some(p) if p == self.root => true,
                    Some(p) => self.nodes.get(p).is_some_and(|n| n.db_id != 0),
                    // the root itself, or a node detached mid-flight
                    None => false,
                };
                if !parent_ready {
                    continue;
                }
                if self.nodes[id].db_id == 0 {
                    let fresh = store.allocate_id();
                    self.nodes[id].db_id = fresh;
                }
                let parent_db = match self.nodes[id].parent {
                    Some(p) if p == self.root => 0,
                    Some(p) => self.nodes[p].db_id,
                    None => 0,
                };
                self.nodes[id].parent_db_id = parent_db;
                puts.push((self.nodes[id].db_id, self.nodes[id].serialize()));
                put_ids.push(id);
                self.insertq.remove(&id);
                added = true;
            }
            if !added {
                break;
            }
        }

        let dels: Vec<u32> = self.deleteq.iter().copied().collect();
        if puts.is_empty() && dels.is_empty() {
            return Ok(());
        }
        match store.commit(&puts, &dels).await {
            Ok(()) => {
                self.deleteq.clear();
                if !self.insertq.is_empty() {
                    warn!(
                        carried = self.insertq.len(),
                        "state-cache batch incomplete, carrying to next commit"
                    );
                }
            }
            Err(err) => {
                error!(%err, "state-cache commit failed, retrying next cycle");
                for id in put_ids {
                    self.insertq.insert(id);
                }
            }
        }
        Ok(())
    }

    /// Removes a node and its subtree from the arena, the fsid index and the
    /// state cache.
    fn destroy_node(&mut self, index: &mut FsidIndex, id: NodeId) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let children: Vec<NodeId> = node.children.values().copied().collect();
        for child in children {
            self.destroy_node(index, child);
        }
        self.statecachedel(id);
        clear_fsid(&mut self.nodes, index, self.config.tag, id);
        let cmp = self.cmp;
        self.nodes.detach(&cmp, id);
        self.pending_nodes.remove(&id);
        if let Some(node) = self.nodes.remove(id) {
            self.unregister_counts(node.kind, node.size);
        }
    }

    /// Raises sync-again along the path from `id` up to the root so the next
    /// walk reaches the node again. Used for completions arriving outside a
    /// walk.
    fn raise_dirty_path(&mut self, id: NodeId) {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(node) = self.nodes.get_mut(current) else {
                break;
            };
            node.sync_again.raise(TreeAction::HereOnly);
            cursor = node.parent;
        }
    }

    async fn changestate(
        &mut self,
        index: &mut FsidIndex,
        new_state: SyncState,
        code: SyncErrorCode,
    ) {
        if new_state == self.state && code == self.error_code {
            return;
        }
        info!(
            tag = self.config.tag,
            from = ?self.state,
            to = ?new_state,
            error = ?code,
            "sync state changing"
        );
        if new_state != SyncState::Canceled {
            self.monitor.on_state_change(self.config.tag, new_state, code);
        }
        self.state = new_state;
        self.error_code = code;
        self.full_scan = false;

        match new_state {
            SyncState::Failed | SyncState::Disabled => {
                // outbound transfers die with the sync
                self.outbound.clear();
                self.in_flight.clear();
                self.pending_nodes.clear();
                self.pending_handles.clear();
                self.watch = None;
                let children: Vec<NodeId> =
                    self.nodes[self.root].children.values().copied().collect();
                for child in children {
                    self.destroy_node(index, child);
                }
                index.purge_sync(self.config.tag);
                self.insertq.clear();
                self.deleteq.clear();
                if let Some(mut store) = self.store.take() {
                    if let Err(err) = store.truncate().await {
                        error!(%err, "state-cache teardown failed");
                    }
                }
            }
            SyncState::Canceled => {
                // additions and deletions are dropped silently from here on
                self.insertq.clear();
                self.deleteq.clear();
                self.outbound.clear();
                self.in_flight.clear();
                self.pending_nodes.clear();
                self.pending_handles.clear();
                self.store = None;
            }
            _ => {}
        }
    }

    pub async fn disable(&mut self, index: &mut FsidIndex) {
        self.changestate(index, SyncState::Disabled, SyncErrorCode::NoError)
            .await;
    }

    pub async fn fail(&mut self, index: &mut FsidIndex, code: SyncErrorCode) {
        self.changestate(index, SyncState::Failed, code).await;
    }

    /// Orderly teardown at shutdown; the cache keeps its rows for the next
    /// start.
    pub async fn shutdown(&mut self, index: &mut FsidIndex) {
        self.changestate(index, SyncState::Canceled, SyncErrorCode::NoError)
            .await;
        index.purge_sync(self.config.tag);
    }

    /// Completion callback from the RPC driver.
    pub fn complete_command(
        &mut self,
        index: &mut FsidIndex,
        request: u64,
        result: Result<Option<NodeHandle>, CloudCommandError>,
    ) {
        let Some((node_id, command)) = self.in_flight.remove(&request) else {
            warn!(request, "completion for unknown cloud request");
            return;
        };
        self.release_pending(node_id, &command);
        if matches!(self.state, SyncState::Canceled | SyncState::Failed | SyncState::Disabled) {
            return;
        }

        match result {
            Err(err) => {
                warn!(request, %err, ?command, "cloud command failed");
                // re-evaluate the row with fresh state on the next walk
                self.raise_dirty_path(node_id);
            }
            Ok(new_handle) => match command {
                CloudCommand::StartUpload { .. } | CloudCommand::NewFolder { .. } => {
                    if let Some(handle) = new_handle
                        && self.nodes.contains(node_id)
                    {
                        let node = &mut self.nodes[node_id];
                        node.remote_handle = handle;
                        node.synced_remote_handle = handle;
                        self.statecacheadd(node_id);
                    }
                }
                CloudCommand::StartDownload { handle, local_path } => {
                    self.finish_download(index, node_id, handle, &local_path);
                }
                CloudCommand::MoveNode { .. } | CloudCommand::DeleteNode { .. } => {}
            },
        }
    }

    fn finish_download(
        &mut self,
        index: &mut FsidIndex,
        node_id: NodeId,
        handle: NodeHandle,
        local_path: &Path,
    ) {
        if !self.nodes.contains(node_id) {
            return;
        }
        match fs::stat(local_path, false) {
            Ok(info) => {
                let fingerprint = FileFingerprint::generate(local_path, info.size, info.mtime)
                    .unwrap_or_else(|_| FileFingerprint::metadata_only(info.size, info.mtime));
                let seq = self.scan_seq_no;
                let node = &mut self.nodes[node_id];
                if node.kind == NodeKind::File {
                    self.local_bytes += info.size.max(0) - node.size.max(0);
                }
                node.size = info.size;
                node.mtime = info.mtime;
                node.fingerprint = fingerprint;
                node.remote_handle = handle;
                node.synced_remote_handle = handle;
                node.scan_again = TreeAction::Resolved;
                node.not_seen = false;
                node.scan_seq_no = seq;
                self.adopt_fsid(index, node_id, info.fs_id);
                self.statecacheadd(node_id);
            }
            Err(err) => {
                warn!(path = %local_path.display(), %err, "downloaded file missing, revisiting");
                self.raise_dirty_path(node_id);
            }
        }
    }

    /// Binds a scanned fsid unless it legitimately belongs to another live
    /// node of this sync (hardlinked duplicates).
    fn adopt_fsid(&mut self, index: &mut FsidIndex, id: NodeId, fs_id: u64) {
        if fs_id == UNDEF || self.nodes[id].fs_id == fs_id {
            return;
        }
        if let Some((tag, other)) = index.get(fs_id)
            && tag == self.config.tag
            && other != id
            && self.nodes.contains(other)
        {
            return;
        }
        set_fsid(&mut self.nodes, index, self.config.tag, id, fs_id);
    }
}
