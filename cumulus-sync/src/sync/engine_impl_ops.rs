impl SyncEngine {
    /// One reconciliation slice. Drains due notifications into scan flags,
    /// finishes the initial scan if needed, honours the quiet-time
    /// watermark, walks the dirty parts of the tree and commits the state
    /// cache batch.
    pub async fn step(
        &mut self,
        index: &mut FsidIndex,
        remote: &RemoteTree,
        now_ds: i64,
        now_utc: OffsetDateTime,
    ) -> Result<(), EngineError> {
        if matches!(
            self.state,
            SyncState::Canceled | SyncState::Failed | SyncState::Disabled
        ) {
            return Ok(());
        }

        self.procscanq(now_ds);

        if self.state == SyncState::InitialScan {
            self.finish_initial_scan(index).await?;
            if self.state != SyncState::Active {
                return Ok(());
            }
        }

        if now_ds < self.queue.quiet_until {
            // scans wait out the notification burst; writes may still flush
            self.cachenodes().await?;
            return Ok(());
        }

        if remote.get(self.config.remote_root).is_none() {
            // no usable view of the cloud root yet
            return Ok(());
        }

        let was_full_scan = self.full_scan;
        if was_full_scan {
            self.scan_seq_no += 1;
        }

        let root_path = self.config.local_root.clone();
        let complete = self.recursive_sync(
            index,
            remote,
            self.root,
            self.config.remote_root,
            &root_path,
            now_ds,
            now_utc,
        );

        if self.nodes[self.root].not_seen {
            self.fail(index, SyncErrorCode::RootMissing).await;
            return Ok(());
        }

        if complete && was_full_scan {
            self.delete_missing(index, self.root);
            self.full_scan = false;
        }

        self.cachenodes().await?;
        Ok(())
    }

    /// Schedules a full walk of the tree, rescanning every folder.
    pub fn request_full_scan(&mut self) {
        self.nodes[self.root].raise_future_scan(TreeAction::HereAndBelow);
        self.nodes[self.root].raise_future_sync(TreeAction::HereAndBelow);
        self.full_scan = true;
    }

    /// Validates the root, restores or recovers fsids, and brings the sync
    /// to the active state with a full scan scheduled.
    async fn finish_initial_scan(&mut self, index: &mut FsidIndex) -> Result<(), EngineError> {
        let root_path = self.config.local_root.clone();
        let info = match fs::stat(&root_path, false) {
            Ok(info) => info,
            Err(FsError::NotFound(_)) => {
                self.changestate(index, SyncState::Failed, SyncErrorCode::RootMissing)
                    .await;
                return Ok(());
            }
            Err(err) if err.is_transient() => return Err(err.into()),
            Err(err) => {
                warn!(root = %root_path.display(), %err, "cannot open sync root");
                self.changestate(index, SyncState::Failed, SyncErrorCode::RootMissing)
                    .await;
                return Ok(());
            }
        };
        if info.is_symlink {
            self.changestate(index, SyncState::Failed, SyncErrorCode::RootIsSymlink)
                .await;
            return Ok(());
        }
        if info.kind != NodeKind::Folder {
            self.changestate(index, SyncState::Failed, SyncErrorCode::RootNotAFolder)
                .await;
            return Ok(());
        }

        let mount_fp = fs::fs_fingerprint(&root_path)?;
        let rotated = self.config.fs_fingerprint != 0 && self.config.fs_fingerprint != mount_fp;
        self.config.fs_fingerprint = mount_fp;
        info!(
            tag = self.config.tag,
            stable_ids = self.fs_stable_ids,
            rotated,
            "leaving initial scan"
        );

        // cached fsids survive a restart only on filesystems with stable
        // ids and an unrotated mount; otherwise re-match by fingerprint
        if !self.fs_stable_ids || rotated {
            let ok = assign_filesystem_ids(
                &mut self.nodes,
                index,
                self.config.tag,
                self.root,
                &root_path,
                &self.local_debris,
            )?;
            if !ok {
                self.changestate(index, SyncState::Failed, SyncErrorCode::RootMissing)
                    .await;
                return Ok(());
            }
        }

        self.changestate(index, SyncState::Active, SyncErrorCode::NoError)
            .await;
        self.request_full_scan();
        self.cachenodes().await?;
        Ok(())
    }

    /// Turns queued notifications into scan-again flags on the deepest
    /// matching nodes and advances the quiet-time watermark.
    fn procscanq(&mut self, now_ds: i64) {
        if self.queue.is_empty() {
            return;
        }
        debug!(pending = self.queue.len(), "marking sync tree from notifications");
        for q in [NotifyQueue::Events, NotifyQueue::Retry] {
            while let Some(notification) = self.queue.pop_due(q, now_ds) {
                let anchor = notification.node.unwrap_or(self.root);
                if !self.nodes.contains(anchor) {
                    debug!(path = %notification.path, "notification skipped, anchor is gone");
                    continue;
                }
                let (deepest, residual) = self.node_by_path(anchor, &notification.path);
                let flag = if residual.is_none() {
                    TreeAction::HereOnly
                } else {
                    TreeAction::HereAndBelow
                };
                let is_file = self.nodes[deepest].kind == NodeKind::File;
                let target = if is_file {
                    self.nodes[deepest].parent.unwrap_or(self.root)
                } else {
                    deepest
                };
                self.nodes[target].raise_future_scan(flag);
                self.nodes[target].raise_future_sync(flag);
                // ancestors must stay visitable or the walk never gets here
                self.raise_dirty_path(target);
                let delay = if self.config.is_network && is_file {
                    EXTRA_SCANNING_DELAY_DS
                } else {
                    SCANNING_DELAY_DS
                };
                self.queue.extend_quiet_time(now_ds, delay);
            }
        }
    }

    /// Walks `path` below `anchor` and returns the deepest existing node,
    /// plus the unresolved remainder if the walk fell off the tree.
    fn node_by_path(&self, anchor: NodeId, path: &str) -> (NodeId, Option<String>) {
        let mut current = anchor;
        let mut cursor = 0usize;
        while let Some(component) = next_component(path, &mut cursor) {
            match self.nodes.child_by_name(&self.cmp, current, component) {
                Some(child) => current = child,
                None => {
                    let mut residual = component.to_string();
                    let rest = path[cursor..].trim_start_matches('/');
                    if !rest.is_empty() {
                        // infallible: the remainder has no leading separator
                        let _ = append_with_separator(&mut residual, rest, true);
                    }
                    return (current, Some(residual));
                }
            }
        }
        (current, None)
    }

    /// Lists one folder, non-recursively. Entries that hit a transient error
    /// go to the retry queue; reconciliation continues on their siblings.
    fn scan_one(&mut self, id: NodeId, dir_path: &Path, now_ds: i64) -> Result<Vec<FsEntry>, FsError> {
        if dir_path.starts_with(&self.local_debris) {
            return Ok(Vec::new());
        }
        debug!(folder = %dir_path.display(), "scanning folder");
        let names = fs::read_dir_names(dir_path)?;
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            if dir_path.join(&name) == self.local_debris {
                continue;
            }
            match fs::scan_entry(dir_path, &name) {
                Ok(entry) => entries.push(entry),
                Err(err) if err.is_transient() => {
                    warn!(dir = %dir_path.display(), name, %err, "entry blocked, queueing retry");
                    // a locked entry is not a deleted one: stand in with the
                    // cached details until the retry lands
                    if let Some(child) = self.nodes.child_by_name(&self.cmp, id, &name) {
                        entries.push(self.nodes[child].known_fs_details());
                    }
                    self.notify_retry(Notification {
                        node: Some(id),
                        path: String::new(),
                        timestamp: now_ds + SCANNING_DELAY_DS,
                    });
                }
                Err(err) => {
                    warn!(dir = %dir_path.display(), name, %err, "skipping unreadable entry");
                }
            }
        }
        Ok(entries)
    }

    /// The recursive triplet walker. Returns true when this subtree came out
    /// fully reconciled; false requests another visit.
    fn recursive_sync(
        &mut self,
        index: &mut FsidIndex,
        remote: &RemoteTree,
        sync_id: NodeId,
        cloud_handle: NodeHandle,
        full_path: &Path,
        now_ds: i64,
        now_utc: OffsetDateTime,
    ) -> bool {
        if matches!(
            self.state,
            SyncState::Canceled | SyncState::Failed | SyncState::Disabled
        ) {
            return true;
        }

        let (scan_flag, sync_flag) = {
            let node = &self.nodes[sync_id];
            (node.scan_again, node.sync_again)
        };
        if scan_flag == TreeAction::Resolved && sync_flag == TreeAction::Resolved {
            return true;
        }
        if self.handle_pending(cloud_handle) {
            // visit again once the in-flight commands land
            return true;
        }

        // dirty-subtree propagation: here-and-below fans out one level and
        // demotes to here-only
        let children: Vec<NodeId> = self.nodes[sync_id].children.values().copied().collect();
        if scan_flag == TreeAction::HereAndBelow {
            for &child in &children {
                self.nodes[child].raise_future_scan(TreeAction::HereAndBelow);
            }
            self.nodes[sync_id].scan_again = TreeAction::HereOnly;
        }
        if sync_flag == TreeAction::HereAndBelow {
            for &child in &children {
                self.nodes[child].raise_future_sync(TreeAction::HereAndBelow);
            }
            self.nodes[sync_id].sync_again = TreeAction::HereOnly;
        }

        // filesystem side
        let fs_children: Vec<FsEntry> = if self.nodes[sync_id].scan_again == TreeAction::HereOnly {
            if now_ds - self.nodes[sync_id].last_scan_time < SCAN_MIN_INTERVAL_DS {
                // don't hammer one folder; come back shortly
                return false;
            }
            match self.scan_one(sync_id, full_path, now_ds) {
                Ok(entries) => {
                    let node = &mut self.nodes[sync_id];
                    node.last_scan_time = now_ds;
                    node.scan_again = TreeAction::Resolved;
                    node.sync_again.raise(TreeAction::HereOnly);
                    entries
                }
                Err(err) if err.is_transient() => {
                    self.notify_retry(Notification {
                        node: Some(sync_id),
                        path: String::new(),
                        timestamp: now_ds + SCANNING_DELAY_DS,
                    });
                    return false;
                }
                Err(err) => {
                    warn!(folder = %full_path.display(), %err, "folder scan failed");
                    self.nodes[sync_id].not_seen = true;
                    if let Some(parent) = self.nodes[sync_id].parent {
                        self.nodes[parent].raise_future_scan(TreeAction::HereOnly);
                        self.raise_dirty_path(parent);
                    }
                    return false;
                }
            }
        } else {
            self.nodes[sync_id]
                .children
                .values()
                .map(|&child| self.nodes[child].known_fs_details())
                .collect()
        };

        // cloud side: alive, decrypted, named, and not our debris folder
        let cloud_children: Vec<(NodeHandle, String)> = remote
            .children_of(cloud_handle)
            .filter(|n| n.syncable(&self.config.debris_name))
            .map(|n| (n.handle, n.name.clone().unwrap_or_default()))
            .collect();

        let sync_children: Vec<NodeId> = self.nodes[sync_id].children.values().copied().collect();

        let rows = self.build_rows(fs_children, sync_children, cloud_children);

        self.nodes[sync_id].scan_again = TreeAction::Resolved;

        let mut all_ok = true;
        for row in &rows {
            if matches!(
                self.state,
                SyncState::Canceled | SyncState::Failed | SyncState::Disabled
            ) {
                return true;
            }

            let name = row
                .fs
                .as_ref()
                .map(|f| f.local_name.clone())
                .or_else(|| row.sync.map(|id| self.nodes[id].local_name.clone()))
                .or_else(|| match row.cloud {
                    CloudSlot::Present(h) => remote.get(h).and_then(|n| n.name.clone()),
                    _ => None,
                });
            let Some(name) = name else { continue };
            let child_path = full_path.join(&name);

            if row.cloud == CloudSlot::Conflict {
                warn!(path = %child_path.display(), "name conflict, row parked until resolved");
                self.monitor.on_name_conflict(&child_path);
                // only a rescan can observe the clash going away
                self.nodes[sync_id].raise_future_scan(TreeAction::HereOnly);
                all_ok = false;
                continue;
            }

            if !self.sync_item(
                index,
                remote,
                row,
                sync_id,
                cloud_handle,
                &child_path,
                now_ds,
                now_utc,
            ) {
                all_ok = false;
            }

            // descend only into rows where all three views exist
            if let (CloudSlot::Present(child_handle), Some(child_sync), Some(_)) =
                (row.cloud, row.sync, row.fs.as_ref())
                && self
                    .nodes
                    .get(child_sync)
                    .is_some_and(|n| n.kind == NodeKind::Folder)
                && !self.recursive_sync(
                    index,
                    remote,
                    child_sync,
                    child_handle,
                    &child_path,
                    now_ds,
                    now_utc,
                )
            {
                all_ok = false;
            }
        }

        self.nodes[sync_id].sync_again = if all_ok {
            TreeAction::Resolved
        } else {
            TreeAction::HereOnly
        };
        all_ok
    }

    /// Pairs the three child lists by name under the filesystem comparator.
    /// Filesystem names colliding under the comparator produce a single
    /// conflict row; duplicate cloud names are skipped outright.
    fn build_rows(
        &self,
        mut fs_children: Vec<FsEntry>,
        mut sync_children: Vec<NodeId>,
        mut cloud_children: Vec<(NodeHandle, String)>,
    ) -> Vec<ChildRow> {
        let cmp = self.cmp;
        fs_children.sort_by(|a, b| cmp.compare(&a.local_name, &b.local_name));
        sync_children.sort_by(|a, b| {
            cmp.compare(&self.nodes[*a].local_name, &self.nodes[*b].local_name)
        });
        cloud_children.sort_by(|a, b| cmp.compare(&a.1, &b.1));

        let mut rows: Vec<ChildRow> = Vec::with_capacity(fs_children.len() + cloud_children.len());

        // merge filesystem and sync lists
        let mut fi = 0;
        let mut si = 0;
        while fi < fs_children.len() || si < sync_children.len() {
            let mut fs_run = 0;
            if fi < fs_children.len() {
                fs_run = 1;
                while fi + fs_run < fs_children.len()
                    && cmp.eq(
                        &fs_children[fi + fs_run].local_name,
                        &fs_children[fi].local_name,
                    )
                {
                    fs_run += 1;
                }
            }

            let (take_fs, take_sync) = match (fi < fs_children.len(), si < sync_children.len()) {
                (true, true) => {
                    match cmp.compare(
                        &fs_children[fi].local_name,
                        &self.nodes[sync_children[si]].local_name,
                    ) {
                        std::cmp::Ordering::Less => (true, false),
                        std::cmp::Ordering::Greater => (false, true),
                        std::cmp::Ordering::Equal => (true, true),
                    }
                }
                (true, false) => (true, false),
                (false, true) => (false, true),
                (false, false) => break,
            };

            rows.push(ChildRow {
                cloud: if take_fs && fs_run > 1 {
                    CloudSlot::Conflict
                } else {
                    CloudSlot::Absent
                },
                sync: take_sync.then(|| sync_children[si]),
                fs: take_fs.then(|| fs_children[fi].clone()),
            });

            if take_fs {
                fi += fs_run;
            }
            if take_sync {
                si += 1;
            }
        }

        // merge the cloud list into the rows
        let row_name = |row: &ChildRow| -> String {
            row.sync
                .map(|id| self.nodes[id].local_name.clone())
                .or_else(|| row.fs.as_ref().map(|f| f.local_name.clone()))
                .unwrap_or_default()
        };

        let mut extra: Vec<ChildRow> = Vec::new();
        let mut ci = 0;
        let mut ri = 0;
        while ci < cloud_children.len() {
            let mut cloud_run = 1;
            while ci + cloud_run < cloud_children.len()
                && cmp.eq(&cloud_children[ci + cloud_run].1, &cloud_children[ci].1)
            {
                cloud_run += 1;
            }
            if cloud_run > 1 {
                warn!(name = %cloud_children[ci].1, "duplicate cloud names, skipping until resolved remotely");
                ci += cloud_run;
                continue;
            }

            let relation = if ri < rows.len() {
                cmp.compare(&cloud_children[ci].1, &row_name(&rows[ri]))
            } else {
                std::cmp::Ordering::Less
            };
            match relation {
                std::cmp::Ordering::Less => {
                    extra.push(ChildRow {
                        cloud: CloudSlot::Present(cloud_children[ci].0),
                        sync: None,
                        fs: None,
                    });
                    ci += 1;
                }
                std::cmp::Ordering::Greater => ri += 1,
                std::cmp::Ordering::Equal => {
                    if rows[ri].cloud != CloudSlot::Conflict {
                        rows[ri].cloud = CloudSlot::Present(cloud_children[ci].0);
                    }
                    ci += 1;
                    ri += 1;
                }
            }
        }
        rows.extend(extra);
        rows
    }

    /// Per-row action dispatch: the `(sync, fs, cloud)` decision table.
    #[allow(clippy::too_many_arguments)]
    fn sync_item(
        &mut self,
        index: &mut FsidIndex,
        remote: &RemoteTree,
        row: &ChildRow,
        parent_sync: NodeId,
        parent_cloud: NodeHandle,
        full_path: &Path,
        now_ds: i64,
        now_utc: OffsetDateTime,
    ) -> bool {
        let cloud = match row.cloud {
            CloudSlot::Present(handle) => remote.get(handle),
            _ => None,
        };
        // commands already in flight for this row finish first
        if let Some(cn) = cloud
            && self.handle_pending(cn.handle)
        {
            return true;
        }
        if let Some(id) = row.sync
            && self.node_pending(id)
        {
            return true;
        }

        match (row.sync, row.fs.as_ref(), cloud) {
            (None, None, None) => {
                debug_assert!(false, "triplet row with no entries");
                true
            }
            (None, None, Some(cn)) => {
                self.item_cloud_only(index, remote, cn.handle, parent_sync, full_path)
            }
            (None, Some(fs_node), None) => self.item_fs_only(
                index,
                fs_node,
                parent_sync,
                parent_cloud,
                full_path,
                now_ds,
            ),
            (None, Some(fs_node), Some(cn)) => self.item_bind(
                index,
                fs_node,
                cn.handle,
                cn.kind,
                &cn.fingerprint(),
                parent_sync,
                full_path,
            ),
            (Some(id), None, None) => self.item_both_gone(index, id),
            (Some(id), None, Some(cn)) => {
                self.item_local_gone(index, remote, id, cn.handle, full_path)
            }
            (Some(id), Some(fs_node), None) => self.item_cloud_gone(
                index,
                remote,
                id,
                fs_node,
                parent_cloud,
                full_path,
                now_ds,
                now_utc,
            ),
            (Some(id), Some(fs_node), Some(cn)) => self.item_three_way(
                index,
                id,
                fs_node,
                cn.handle,
                cn.kind,
                &cn.fingerprint(),
                cn.mtime,
                parent_cloud,
                full_path,
                now_ds,
                now_utc,
            ),
        }
    }

    /// Cloud-only entry: folders materialise immediately, files get a
    /// download whose completion binds the node.
    fn item_cloud_only(
        &mut self,
        index: &mut FsidIndex,
        remote: &RemoteTree,
        handle: NodeHandle,
        parent_sync: NodeId,
        full_path: &Path,
    ) -> bool {
        let Some(cn) = remote.get(handle) else {
            return true;
        };
        let Some(name) = cn.name.clone() else {
            return true;
        };
        let cmp = self.cmp;
        match cn.kind {
            NodeKind::Folder => {
                match fs::mkdir(full_path, false) {
                    Ok(()) => {}
                    Err(FsError::Permanent { source, .. })
                        if source.kind() == std::io::ErrorKind::AlreadyExists => {}
                    Err(err) => {
                        warn!(path = %full_path.display(), %err, "cannot create folder for cloud entry");
                        return false;
                    }
                }
                debug!(path = %full_path.display(), "new local folder from cloud");
                let mut node = SyncNode::new(NodeKind::Folder, name, fs::short_name(full_path));
                node.remote_handle = handle;
                node.synced_remote_handle = handle;
                node.scan_again = TreeAction::HereOnly;
                node.sync_again = TreeAction::HereOnly;
                node.scan_seq_no = self.scan_seq_no;
                let id = self.nodes.insert(node);
                self.nodes.attach(&cmp, parent_sync, id);
                self.register_counts(NodeKind::Folder, 0);
                if let Ok(info) = fs::stat(full_path, false) {
                    self.adopt_fsid(index, id, info.fs_id);
                }
                self.statecacheadd(id);
                // revisit to scan the new folder and pull its children
                false
            }
            NodeKind::File => {
                debug!(path = %full_path.display(), "scheduling download for cloud entry");
                let mut node = SyncNode::new(NodeKind::File, name, None);
                node.remote_handle = handle;
                node.scan_seq_no = self.scan_seq_no;
                let id = self.nodes.insert(node);
                self.nodes.attach(&cmp, parent_sync, id);
                self.register_counts(NodeKind::File, 0);
                self.statecacheadd(id);
                self.issue(
                    id,
                    CloudCommand::StartDownload {
                        handle,
                        local_path: full_path.to_path_buf(),
                    },
                );
                true
            }
        }
    }

    /// Filesystem-only entry: either the target of a move, or genuinely new.
    fn item_fs_only(
        &mut self,
        index: &mut FsidIndex,
        fs_node: &FsEntry,
        parent_sync: NodeId,
        parent_cloud: NodeHandle,
        full_path: &Path,
        now_ds: i64,
    ) -> bool {
        if fs_node.is_symlink {
            // symlinks are observed but never synced
            return true;
        }

        // move detection: the fsid may already identify a node elsewhere
        if fs_node.fs_id != UNDEF
            && let Some((tag, moved)) = index.get(fs_node.fs_id)
            && tag == self.config.tag
            && self.nodes.contains(moved)
            && self.nodes[moved].kind == fs_node.kind
        {
            let origin_path = self.nodes.full_path(&self.config.local_root, self.root, moved);
            if origin_path != full_path {
                match fs::stat(&origin_path, false) {
                    Err(FsError::NotFound(_)) => {
                        return self.commit_move(index, moved, parent_sync, parent_cloud, fs_node);
                    }
                    Ok(info) if fs_node.kind == NodeKind::File => {
                        // the origin still exists and may be mid-write: wait
                        // for it to settle before deciding copy vs move
                        match self.check_file_stability(&origin_path, info.size, info.mtime, now_ds)
                        {
                            Stability::Wait => {
                                // no node holds this entry yet, so the next
                                // visit must rescan to rebuild the row
                                self.nodes[parent_sync].raise_future_scan(TreeAction::HereOnly);
                                return false;
                            }
                            Stability::Abandoned | Stability::Stable => {
                                // origin survived: a copy, so the new path is
                                // a new file
                            }
                        }
                    }
                    // folder copies and transient errors fall through and
                    // are treated as new entries
                    _ => {}
                }
            }
        }

        debug!(path = %full_path.display(), "new sync node for local entry");
        let cmp = self.cmp;
        let mut node = SyncNode::new(
            fs_node.kind,
            fs_node.local_name.clone(),
            fs_node.short_name.clone(),
        );
        node.size = fs_node.size;
        node.mtime = fs_node.mtime;
        node.fingerprint = fs_node.fingerprint;
        node.scan_seq_no = self.scan_seq_no;
        node.sync_again = TreeAction::HereOnly;
        if fs_node.kind == NodeKind::Folder {
            node.scan_again = TreeAction::HereOnly;
        }
        let id = self.nodes.insert(node);
        self.nodes.attach(&cmp, parent_sync, id);
        self.register_counts(fs_node.kind, fs_node.size);
        self.adopt_fsid(index, id, fs_node.fs_id);
        self.statecacheadd(id);
        // the upload happens on the next visit, once the row pairs up
        false
    }

    fn commit_move(
        &mut self,
        index: &mut FsidIndex,
        moved: NodeId,
        parent_sync: NodeId,
        parent_cloud: NodeHandle,
        fs_node: &FsEntry,
    ) -> bool {
        info!(
            from = %self.nodes.relative_path(self.root, moved),
            to = %fs_node.local_name,
            "local move detected"
        );
        let cmp = self.cmp;
        self.nodes.set_name_parent(
            &cmp,
            moved,
            parent_sync,
            &fs_node.local_name,
            fs_node.short_name.clone(),
        );
        {
            let seq = self.scan_seq_no;
            let node = &mut self.nodes[moved];
            node.not_seen = false;
            node.deleted = false;
            node.scan_seq_no = seq;
            if fs_node.kind == NodeKind::File && fs_node.fingerprint.valid {
                node.size = fs_node.size;
                node.mtime = fs_node.mtime;
                node.fingerprint = fs_node.fingerprint;
            }
        }
        self.adopt_fsid(index, moved, fs_node.fs_id);
        self.statecacheadd(moved);
        if self.nodes[moved].remote_handle != UNDEF && parent_cloud != UNDEF {
            let handle = self.nodes[moved].remote_handle;
            self.issue(
                moved,
                CloudCommand::MoveNode {
                    handle,
                    new_parent: parent_cloud,
                    new_name: fs_node.local_name.clone(),
                },
            );
        }
        true
    }

    /// Local and cloud both exist but were never paired before.
    fn item_bind(
        &mut self,
        index: &mut FsidIndex,
        fs_node: &FsEntry,
        handle: NodeHandle,
        cloud_kind: NodeKind,
        cloud_fingerprint: &FileFingerprint,
        parent_sync: NodeId,
        full_path: &Path,
    ) -> bool {
        if fs_node.is_symlink || fs_node.kind != cloud_kind {
            // kind clash: leave both sides alone until one of them changes
            warn!(path = %full_path.display(), "local and cloud entries disagree on kind");
            return true;
        }
        debug!(path = %full_path.display(), "binding local entry to cloud node");
        let cmp = self.cmp;
        let mut node = SyncNode::new(
            fs_node.kind,
            fs_node.local_name.clone(),
            fs_node.short_name.clone(),
        );
        node.size = fs_node.size;
        node.mtime = fs_node.mtime;
        node.remote_handle = handle;
        node.scan_seq_no = self.scan_seq_no;
        let mut settled = true;
        match fs_node.kind {
            NodeKind::File => {
                if fs_node.fingerprint.matches(cloud_fingerprint) {
                    node.fingerprint = fs_node.fingerprint;
                    node.synced_remote_handle = handle;
                } else {
                    // contents disagree with no sync history: keep the base
                    // unsampled so the three-way pass decides by mtime
                    node.fingerprint = FileFingerprint::metadata_only(fs_node.size, fs_node.mtime);
                    node.sync_again = TreeAction::HereOnly;
                    settled = false;
                }
            }
            NodeKind::Folder => {
                node.synced_remote_handle = handle;
                node.scan_again = TreeAction::HereOnly;
                node.sync_again = TreeAction::HereOnly;
                settled = false;
            }
        }
        let id = self.nodes.insert(node);
        self.nodes.attach(&cmp, parent_sync, id);
        self.register_counts(fs_node.kind, fs_node.size);
        self.adopt_fsid(index, id, fs_node.fs_id);
        self.statecacheadd(id);
        settled
    }

    /// Local and cloud both vanished: one grace pass, then the node goes.
    fn item_both_gone(&mut self, index: &mut FsidIndex, id: NodeId) -> bool {
        if self.nodes[id].not_seen {
            debug!(name = %self.nodes[id].local_name, "node gone on both sides, removing");
            self.destroy_node(index, id);
            true
        } else {
            self.nodes[id].not_seen = true;
            false
        }
    }

    /// The local entry vanished while the cloud one remains.
    fn item_local_gone(
        &mut self,
        index: &mut FsidIndex,
        remote: &RemoteTree,
        id: NodeId,
        handle: NodeHandle,
        full_path: &Path,
    ) -> bool {
        if self.nodes[id].synced_remote_handle != UNDEF {
            // was in sync: the user deleted (or moved) it locally. One grace
            // pass lets a concurrent move claim the node by fsid first.
            if !self.nodes[id].not_seen {
                let node = &mut self.nodes[id];
                node.not_seen = true;
                node.deleted = true;
                return false;
            }
            info!(path = %full_path.display(), "local deletion, removing cloud node");
            self.issue(id, CloudCommand::DeleteNode { handle });
            self.destroy_node(index, id);
            true
        } else {
            // never synced here: the cloud entry arrived while a stale node
            // lingered; adopt it
            let Some(cn) = remote.get(handle) else {
                return true;
            };
            if self.nodes[id].kind != cn.kind {
                self.destroy_node(index, id);
                return false;
            }
            match cn.kind {
                NodeKind::File => {
                    self.nodes[id].remote_handle = handle;
                    self.statecacheadd(id);
                    self.issue(
                        id,
                        CloudCommand::StartDownload {
                            handle,
                            local_path: full_path.to_path_buf(),
                        },
                    );
                    true
                }
                NodeKind::Folder => {
                    if let Err(err) = fs::mkdir(full_path, true) {
                        warn!(path = %full_path.display(), %err, "cannot recreate folder");
                        return false;
                    }
                    let node = &mut self.nodes[id];
                    node.remote_handle = handle;
                    node.synced_remote_handle = handle;
                    node.scan_again = TreeAction::HereOnly;
                    node.sync_again = TreeAction::HereOnly;
                    self.statecacheadd(id);
                    false
                }
            }
        }
    }

    /// The cloud entry vanished while the local one remains.
    #[allow(clippy::too_many_arguments)]
    fn item_cloud_gone(
        &mut self,
        index: &mut FsidIndex,
        remote: &RemoteTree,
        id: NodeId,
        fs_node: &FsEntry,
        parent_cloud: NodeHandle,
        full_path: &Path,
        now_ds: i64,
        now_utc: OffsetDateTime,
    ) -> bool {
        self.mark_seen(id);
        let synced = self.nodes[id].synced_remote_handle;
        if synced != UNDEF {
            if let Some(rn) = remote.get(synced)
                && rn.alive
            {
                // the cloud node moved elsewhere; follow it locally
                return self.follow_cloud_move(index, remote, id, synced, full_path);
            }
            // deleted in the cloud: park the local bytes in debris
            match move_to_local_debris(full_path, &self.local_debris, now_utc) {
                Ok(true) => {
                    info!(path = %full_path.display(), "cloud deletion, local entry moved to debris");
                    self.destroy_node(index, id);
                    true
                }
                Ok(false) => false,
                Err(err) => {
                    warn!(path = %full_path.display(), %err, "debris move failed");
                    false
                }
            }
        } else {
            // new local entry: push it up
            if parent_cloud == UNDEF {
                return false;
            }
            match fs_node.kind {
                NodeKind::File => {
                    if !fs_node.fingerprint.valid {
                        warn!(path = %full_path.display(), "refusing upload without a fingerprint");
                        return false;
                    }
                    if self.nodes[id].fingerprint != fs_node.fingerprint {
                        let delta = fs_node.size.max(0) - self.nodes[id].size.max(0);
                        self.local_bytes += delta;
                        let node = &mut self.nodes[id];
                        node.size = fs_node.size;
                        node.mtime = fs_node.mtime;
                        node.fingerprint = fs_node.fingerprint;
                    }
                    debug!(path = %full_path.display(), "uploading new local file");
                    self.statecacheadd(id);
                    self.issue(
                        id,
                        CloudCommand::StartUpload {
                            parent: parent_cloud,
                            name: fs_node.local_name.clone(),
                            local_path: full_path.to_path_buf(),
                            fingerprint: fs_node.fingerprint,
                        },
                    );
                    true
                }
                NodeKind::Folder => {
                    debug!(path = %full_path.display(), "creating cloud folder");
                    self.issue(
                        id,
                        CloudCommand::NewFolder {
                            parent: parent_cloud,
                            name: fs_node.local_name.clone(),
                        },
                    );
                    // the subtree stays dirty until the handle exists
                    false
                }
            }
        }
    }

    fn follow_cloud_move(
        &mut self,
        index: &mut FsidIndex,
        remote: &RemoteTree,
        id: NodeId,
        handle: NodeHandle,
        full_path: &Path,
    ) -> bool {
        let Some(mut parts) = remote.path_of(self.config.remote_root, handle) else {
            return false;
        };
        let Some(leaf) = parts.pop() else {
            return false;
        };
        let parent_rel = parts.join("/");
        let Some(new_parent) = self.node_by_rel_path(&parent_rel) else {
            // destination folder not materialised yet; try again later
            return false;
        };
        let mut new_local = self.config.local_root.clone();
        for part in &parts {
            new_local.push(part);
        }
        new_local.push(&leaf);
        match fs::rename(full_path, &new_local, false) {
            Ok(()) => {
                info!(from = %full_path.display(), to = %new_local.display(), "following cloud-side move");
                let cmp = self.cmp;
                let short = fs::short_name(&new_local);
                self.nodes.set_name_parent(&cmp, id, new_parent, &leaf, short);
                self.statecacheadd(id);
                true
            }
            Err(err) => {
                warn!(from = %full_path.display(), %err, "cannot follow cloud move yet");
                false
            }
        }
    }

    /// All three views exist: compare and converge.
    #[allow(clippy::too_many_arguments)]
    fn item_three_way(
        &mut self,
        index: &mut FsidIndex,
        id: NodeId,
        fs_node: &FsEntry,
        handle: NodeHandle,
        cloud_kind: NodeKind,
        cloud_fingerprint: &FileFingerprint,
        cloud_mtime: i64,
        parent_cloud: NodeHandle,
        full_path: &Path,
        _now_ds: i64,
        now_utc: OffsetDateTime,
    ) -> bool {
        self.mark_seen(id);
        self.adopt_fsid(index, id, fs_node.fs_id);

        if self.nodes[id].kind == NodeKind::Folder {
            if cloud_kind != NodeKind::Folder {
                warn!(path = %full_path.display(), "kind clash between folder node and cloud file");
                return true;
            }
            if self.nodes[id].synced_remote_handle != handle {
                let node = &mut self.nodes[id];
                node.remote_handle = handle;
                node.synced_remote_handle = handle;
                self.statecacheadd(id);
            }
            return true;
        }

        let fs_fp = fs_node.fingerprint;
        if fs_fp.matches(cloud_fingerprint) {
            // both sides agree; make sure our record says so too
            let refresh = {
                let node = &self.nodes[id];
                node.synced_remote_handle != handle || !node.fingerprint.matches(&fs_fp)
            };
            if refresh {
                let delta = fs_node.size.max(0) - self.nodes[id].size.max(0);
                self.local_bytes += delta;
                let node = &mut self.nodes[id];
                node.size = fs_node.size;
                node.mtime = fs_node.mtime;
                node.fingerprint = fs_fp;
                node.remote_handle = handle;
                node.synced_remote_handle = handle;
                self.statecacheadd(id);
            }
            return true;
        }

        let base = self.nodes[id].fingerprint;
        let local_changed = !fs_fp.matches(&base);
        let cloud_changed = !cloud_fingerprint.matches(&base);
        let local_wins = match (local_changed, cloud_changed) {
            (true, false) => true,
            (false, true) => false,
            // both changed, or no usable base: newer mtime wins
            _ => fs_node.mtime >= cloud_mtime,
        };

        if local_wins {
            // the cloud keeps the loser in its version history
            info!(path = %full_path.display(), "local change wins, uploading");
            let delta = fs_node.size.max(0) - self.nodes[id].size.max(0);
            self.local_bytes += delta;
            {
                let node = &mut self.nodes[id];
                node.size = fs_node.size;
                node.mtime = fs_node.mtime;
                node.fingerprint = fs_fp;
                node.remote_handle = handle;
            }
            self.statecacheadd(id);
            self.issue(
                id,
                CloudCommand::StartUpload {
                    parent: parent_cloud,
                    name: fs_node.local_name.clone(),
                    local_path: full_path.to_path_buf(),
                    fingerprint: fs_fp,
                },
            );
            true
        } else {
            // the loser's bytes are parked in debris before the download
            info!(path = %full_path.display(), "cloud change wins, fetching");
            match move_to_local_debris(full_path, &self.local_debris, now_utc) {
                Ok(true) => {
                    self.issue(
                        id,
                        CloudCommand::StartDownload {
                            handle,
                            local_path: full_path.to_path_buf(),
                        },
                    );
                    true
                }
                Ok(false) => false,
                Err(err) => {
                    warn!(path = %full_path.display(), %err, "debris move failed");
                    false
                }
            }
        }
    }

    fn mark_seen(&mut self, id: NodeId) {
        let seq = self.scan_seq_no;
        let node = &mut self.nodes[id];
        node.not_seen = false;
        node.deleted = false;
        node.scan_seq_no = seq;
    }

    /// Two observations at least `FILE_UPDATE_DELAY_DS` apart must agree on
    /// size and mtime; past `FILE_UPDATE_MAX_DELAY_SECS` the wait is
    /// abandoned with a telemetry event.
    fn check_file_stability(
        &mut self,
        path: &Path,
        size: i64,
        mtime: i64,
        now_ds: i64,
    ) -> Stability {
        let outcome = match &mut self.watch {
            Some(watch) if watch.path == path => {
                if watch.size != size || watch.mtime != mtime {
                    watch.size = size;
                    watch.mtime = mtime;
                    watch.last_change_ds = now_ds;
                }
                if now_ds - watch.last_change_ds >= FILE_UPDATE_DELAY_DS {
                    Stability::Stable
                } else if now_ds - watch.initial_ds > FILE_UPDATE_MAX_DELAY_SECS * 10 {
                    Stability::Abandoned
                } else {
                    Stability::Wait
                }
            }
            _ => {
                self.watch = Some(FileWatch {
                    path: path.to_path_buf(),
                    size,
                    mtime,
                    last_change_ds: now_ds,
                    initial_ds: now_ds,
                });
                Stability::Wait
            }
        };
        match outcome {
            Stability::Stable => {
                self.watch = None;
            }
            Stability::Abandoned => {
                self.watch = None;
                warn!(path = %path.display(), "file never stabilised, dropping pending operation");
                self.monitor
                    .on_event(EVENT_FILE_NEVER_STABLE, &path.display().to_string());
            }
            Stability::Wait => {}
        }
        outcome
    }

    /// Drops nodes that have now been missing across more than one full
    /// scan.
    fn delete_missing(&mut self, index: &mut FsidIndex, id: NodeId) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let children: Vec<NodeId> = node.children.values().copied().collect();
        for child in children {
            if self.scan_seq_no.saturating_sub(self.nodes[child].scan_seq_no) > 1 {
                debug!(name = %self.nodes[child].local_name, "missing across two scans, removing");
                self.destroy_node(index, child);
            } else {
                self.delete_missing(index, child);
            }
        }
    }
}
