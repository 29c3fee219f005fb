impl StateStore {
    /// Opens (creating if missing) the node-cache table identified by the
    /// sync's identity triple.
    pub async fn open(
        pool: SqlitePool,
        root_fs_id: u64,
        remote_root: NodeHandle,
        account_id: u64,
    ) -> Result<Self, StoreError> {
        let table = state_table_name(root_fs_id, remote_root, account_id);
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (id INTEGER PRIMARY KEY, data BLOB NOT NULL)"
        ))
        .execute(&pool)
        .await?;

        let row = sqlx::query(&format!("SELECT COALESCE(MAX(id), 0) AS top FROM \"{table}\""))
            .fetch_one(&pool)
            .await?;
        let top: i64 = row.try_get("top")?;

        Ok(Self {
            pool,
            table,
            next_id: top as u32,
        })
    }

    /// Connects the shared on-disk database in the user's data directory.
    pub async fn connect_default() -> Result<SqlitePool, StoreError> {
        let db_path = default_db_path()?;
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        Ok(SqlitePool::connect_with(options).await?)
    }

    /// Hands out the next free row id. Ids are assigned when a node is first
    /// queued for persistence and stay stable for its lifetime.
    pub fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub async fn load_all(&self) -> Result<Vec<(u32, Vec<u8>)>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT id, data FROM \"{}\" ORDER BY id ASC",
            self.table
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let data: Vec<u8> = row.try_get("data")?;
            out.push((id as u32, data));
        }
        Ok(out)
    }

    /// Applies one batch in a single transaction: deletions first, then
    /// upserts. Either everything lands or nothing does.
    pub async fn commit(&self, puts: &[(u32, Vec<u8>)], dels: &[u32]) -> Result<(), StoreError> {
        if puts.is_empty() && dels.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for id in dels {
            sqlx::query(&format!("DELETE FROM \"{}\" WHERE id = ?1", self.table))
                .bind(*id as i64)
                .execute(&mut *tx)
                .await?;
        }
        for (id, data) in puts {
            sqlx::query(&format!(
                "INSERT OR REPLACE INTO \"{}\" (id, data) VALUES (?1, ?2)",
                self.table
            ))
            .bind(*id as i64)
            .bind(data.as_slice())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Drops every row; used when a sync is torn down for good.
    pub async fn truncate(&mut self) -> Result<(), StoreError> {
        sqlx::query(&format!("DELETE FROM \"{}\"", self.table))
            .execute(&self.pool)
            .await?;
        self.next_id = 0;
        Ok(())
    }
}

impl ConfigBag {
    pub async fn open(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS syncconfigs (tag INTEGER PRIMARY KEY, data TEXT NOT NULL)",
        )
        .execute(&pool)
        .await?;

        let rows = sqlx::query("SELECT tag, data FROM syncconfigs ORDER BY tag ASC")
            .fetch_all(&pool)
            .await?;
        let mut configs = HashMap::with_capacity(rows.len());
        for row in rows {
            let tag: i64 = row.try_get("tag")?;
            let data: String = row.try_get("data")?;
            match serde_json::from_str::<SyncConfig>(&data) {
                Ok(config) => {
                    configs.insert(config.tag, config);
                }
                Err(err) => warn!(tag, %err, "dropping unreadable sync config row"),
            }
        }
        Ok(Self { pool, configs })
    }

    /// Inserts or updates one config, both in memory and on disk.
    pub async fn insert(&mut self, config: SyncConfig) -> Result<(), StoreError> {
        let data =
            serde_json::to_string(&config).map_err(|e| StoreError::BadConfig(config.tag, e))?;
        sqlx::query(
            "INSERT INTO syncconfigs (tag, data) VALUES (?1, ?2)
             ON CONFLICT(tag) DO UPDATE SET data = excluded.data",
        )
        .bind(config.tag as i64)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        self.configs.insert(config.tag, config);
        Ok(())
    }

    pub async fn remove_by_tag(&mut self, tag: i32) -> Result<bool, StoreError> {
        sqlx::query("DELETE FROM syncconfigs WHERE tag = ?1")
            .bind(tag as i64)
            .execute(&self.pool)
            .await?;
        Ok(self.configs.remove(&tag).is_some())
    }

    pub fn get(&self, tag: i32) -> Option<&SyncConfig> {
        self.configs.get(&tag)
    }

    pub fn all(&self) -> impl Iterator<Item = &SyncConfig> {
        self.configs.values()
    }
}
