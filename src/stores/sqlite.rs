//! SQLite + sqlite-vec backed vector index.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/catalog.sqlite3          collection name -> shard mapping
//! <root>/<shard-uuid>/chunks.sqlite3   one database per conversation
//! ```
//!
//! All operations funnel through a single async mutex, so inserts and
//! queries never interleave with the janitor's reset-and-reclaim sequence.

use std::collections::HashMap;
use std::mem::transmute;
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_rusqlite::{Connection, OptionalExtension, ffi};
use uuid::Uuid;

use super::{
    ChunkMetadata, CollectionHandle, NEUTRAL_SIMILARITY, RetrievedChunk, VectorIndex,
};
use crate::chunking::TranscriptChunk;
use crate::types::{Result, SiftError};

const CATALOG_FILE: &str = "catalog.sqlite3";
const SHARD_DB_FILE: &str = "chunks.sqlite3";
const COLLECTION_PREFIX: &str = "conversation_";

/// Per-conversation vector index rooted at a shared storage directory.
pub struct SqliteVectorIndex {
    root: PathBuf,
    state: Mutex<BackendState>,
}

struct BackendState {
    catalog: Connection,
    shards: HashMap<String, Connection>,
}

impl SqliteVectorIndex {
    /// Opens (or creates) the index under `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        register_sqlite_vec()?;
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let catalog = open_catalog(&root).await?;
        tracing::info!(root = %root.display(), "vector index opened");
        Ok(Self {
            root,
            state: Mutex::new(BackendState {
                catalog,
                shards: HashMap::new(),
            }),
        })
    }

    /// Storage root shared by the catalog and all shard directories.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait::async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn create_collection(&self, conversation_id: &str) -> Result<CollectionHandle> {
        let mut state = self.state.lock().await;
        if let Some(existing) = lookup(&state.catalog, conversation_id).await? {
            tracing::debug!(conversation = conversation_id, "collection already exists");
            return Ok(existing);
        }

        let handle = CollectionHandle {
            name: format!("{COLLECTION_PREFIX}{conversation_id}"),
            conversation_id: conversation_id.to_string(),
            shard: Uuid::new_v4().to_string(),
        };
        // Open the shard first so a failed setup leaves no catalog entry.
        let conn = open_shard(&self.root, &handle.shard).await?;
        state.shards.insert(handle.shard.clone(), conn);

        let row = handle.clone();
        state
            .catalog
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO collections (name, conversation_id, shard, created_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    (
                        &row.name,
                        &row.conversation_id,
                        &row.shard,
                        Utc::now().to_rfc3339(),
                    ),
                )
                ?;
                Ok(())
            })
            .await
            .map_err(storage_err)?;

        tracing::info!(
            conversation = conversation_id,
            shard = %handle.shard,
            "created collection"
        );
        Ok(handle)
    }

    async fn get_collection(&self, conversation_id: &str) -> Result<Option<CollectionHandle>> {
        let state = self.state.lock().await;
        lookup(&state.catalog, conversation_id).await
    }

    async fn insert_chunks(
        &self,
        handle: &CollectionHandle,
        rows: Vec<(TranscriptChunk, Vec<f32>)>,
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut prepared = Vec::with_capacity(rows.len());
        for (chunk, embedding) in rows {
            let payload = serde_json::to_string(&embedding)
                .map_err(|err| SiftError::Storage(err.to_string()))?;
            prepared.push(PreparedRow {
                id: format!("{}_{}", handle.conversation_id, chunk.chunk_id),
                conversation_id: handle.conversation_id.clone(),
                chunk_id: chunk.chunk_id as i64,
                start_index: chunk.start_index as i64,
                end_index: chunk.end_index as i64,
                content: chunk.text,
                embedding: payload,
            });
        }
        let inserted = prepared.len();

        let mut state = self.state.lock().await;
        let conn = shard_conn(&mut state, &self.root, &handle.shard).await?;
        conn.call(move |conn| {
            let tx = conn
                .transaction()
                ?;
            {
                let mut chunk_stmt = tx
                    .prepare(
                        "INSERT INTO chunks \
                         (id, conversation_id, chunk_id, start_index, end_index, content) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )
                    ?;
                let mut embed_stmt = tx
                    .prepare("INSERT INTO chunk_embeddings (id, embedding) VALUES (?1, ?2)")
                    ?;
                for row in prepared {
                    chunk_stmt
                        .execute((
                            &row.id,
                            &row.conversation_id,
                            row.chunk_id,
                            row.start_index,
                            row.end_index,
                            &row.content,
                        ))
                        ?;
                    embed_stmt
                        .execute((&row.id, &row.embedding))
                        ?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(storage_err)?;

        tracing::info!(
            conversation = %handle.conversation_id,
            chunks = inserted,
            "stored transcript chunks"
        );
        Ok(inserted)
    }

    async fn query(
        &self,
        handle: &CollectionHandle,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let payload =
            serde_json::to_string(vector).map_err(|err| SiftError::Storage(err.to_string()))?;

        let mut state = self.state.lock().await;
        let conn = shard_conn(&mut state, &self.root, &handle.shard).await?;
        conn.call(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT c.conversation_id, c.chunk_id, c.start_index, c.end_index, c.content, \
                     vec_distance_cosine(e.embedding, vec_f32(?)) AS distance \
                     FROM chunks c \
                     JOIN chunk_embeddings e ON c.id = e.id \
                     ORDER BY distance ASC \
                     LIMIT {top_k}"
                ))
                ?;

            let mapped = stmt
                .query_map([&payload], |row| {
                    let distance: f32 = row.get(5)?;
                    Ok(RetrievedChunk {
                        metadata: ChunkMetadata {
                            conversation_id: row.get(0)?,
                            chunk_id: row.get::<_, i64>(1)? as usize,
                            start_index: row.get::<_, i64>(2)? as usize,
                            end_index: row.get::<_, i64>(3)? as usize,
                        },
                        text: row.get(4)?,
                        similarity: (1.0 - distance).max(0.0),
                    })
                })
                ?;

            let mut results = Vec::new();
            for row in mapped {
                results.push(row?);
            }
            Ok(results)
        })
        .await
        .map_err(storage_err)
    }

    async fn get_all(&self, handle: &CollectionHandle) -> Result<Vec<RetrievedChunk>> {
        let mut state = self.state.lock().await;
        let conn = shard_conn(&mut state, &self.root, &handle.shard).await?;
        conn.call(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT conversation_id, chunk_id, start_index, end_index, content \
                     FROM chunks ORDER BY chunk_id ASC",
                )
                ?;

            let mapped = stmt
                .query_map([], |row| {
                    Ok(RetrievedChunk {
                        metadata: ChunkMetadata {
                            conversation_id: row.get(0)?,
                            chunk_id: row.get::<_, i64>(1)? as usize,
                            start_index: row.get::<_, i64>(2)? as usize,
                            end_index: row.get::<_, i64>(3)? as usize,
                        },
                        text: row.get(4)?,
                        similarity: NEUTRAL_SIMILARITY,
                    })
                })
                ?;

            let mut results = Vec::new();
            for row in mapped {
                results.push(row?);
            }
            Ok(results)
        })
        .await
        .map_err(storage_err)
    }

    async fn count(&self, handle: &CollectionHandle) -> Result<usize> {
        let mut state = self.state.lock().await;
        let conn = shard_conn(&mut state, &self.root, &handle.shard).await?;
        conn.call(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                ?;
            Ok(count as usize)
        })
        .await
        .map_err(storage_err)
    }

    async fn list_collections(&self) -> Result<Vec<CollectionHandle>> {
        let state = self.state.lock().await;
        state
            .catalog
            .call(|conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT name, conversation_id, shard FROM collections ORDER BY name",
                    )
                    ?;
                let mapped = stmt
                    .query_map([], |row| {
                        Ok(CollectionHandle {
                            name: row.get(0)?,
                            conversation_id: row.get(1)?,
                            shard: row.get(2)?,
                        })
                    })
                    ?;
                let mut handles = Vec::new();
                for row in mapped {
                    handles.push(row?);
                }
                Ok(handles)
            })
            .await
            .map_err(storage_err)
    }

    async fn delete_collection(&self, conversation_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(handle) = lookup(&state.catalog, conversation_id).await? else {
            tracing::debug!(conversation = conversation_id, "no collection to delete");
            return Ok(false);
        };

        // Drop the cached connection before anything touches the shard files.
        state.shards.remove(&handle.shard);

        let name = handle.name.clone();
        state
            .catalog
            .call(move |conn| {
                conn.execute("DELETE FROM collections WHERE name = ?", [&name])
                    ?;
                Ok(())
            })
            .await
            .map_err(storage_err)?;

        tracing::info!(conversation = conversation_id, shard = %handle.shard, "deleted collection");
        Ok(true)
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.shards.clear();
        state.catalog = open_catalog(&self.root).await?;
        tracing::info!("vector index client handles reset");
        Ok(())
    }
}

struct PreparedRow {
    id: String,
    conversation_id: String,
    chunk_id: i64,
    start_index: i64,
    end_index: i64,
    content: String,
    embedding: String,
}

fn storage_err(err: tokio_rusqlite::Error) -> SiftError {
    SiftError::Storage(err.to_string())
}

/// Registers the sqlite-vec extension once per process.
fn register_sqlite_vec() -> Result<()> {
    static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

    let outcome = INIT.get_or_init(|| unsafe {
        type SqliteExtensionInit = unsafe extern "C" fn(
            *mut ffi::sqlite3,
            *mut *mut c_char,
            *const ffi::sqlite3_api_routines,
        ) -> i32;

        let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
        let init_fn: SqliteExtensionInit =
            transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
        let rc = ffi::sqlite3_auto_extension(Some(init_fn));
        if rc != 0 {
            Err(format!("failed to register sqlite-vec extension (code {rc})"))
        } else {
            Ok(())
        }
    });

    outcome.clone().map_err(SiftError::Storage)
}

async fn open_catalog(root: &Path) -> Result<Connection> {
    let conn = Connection::open(root.join(CATALOG_FILE))
        .await
        .map_err(|err| storage_err(err.into()))?;
    conn.call(|conn| {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS collections (
                 name TEXT PRIMARY KEY,
                 conversation_id TEXT NOT NULL UNIQUE,
                 shard TEXT NOT NULL,
                 created_at TEXT NOT NULL
             )",
            [],
        )
        ?;
        Ok(())
    })
    .await
    .map_err(storage_err)?;
    Ok(conn)
}

async fn open_shard(root: &Path, shard: &str) -> Result<Connection> {
    let dir = root.join(shard);
    tokio::fs::create_dir_all(&dir).await?;
    let conn = Connection::open(dir.join(SHARD_DB_FILE))
        .await
        .map_err(|err| storage_err(err.into()))?;
    conn.call(|conn| {
        // Fails when the sqlite-vec extension is missing.
        conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
            ?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chunks (
                 id TEXT PRIMARY KEY,
                 conversation_id TEXT NOT NULL,
                 chunk_id INTEGER NOT NULL,
                 start_index INTEGER NOT NULL,
                 end_index INTEGER NOT NULL,
                 content TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS chunk_embeddings (
                 id TEXT PRIMARY KEY,
                 embedding TEXT NOT NULL
             );",
        )
        ?;
        Ok(())
    })
    .await
    .map_err(storage_err)?;
    Ok(conn)
}

async fn shard_conn(
    state: &mut BackendState,
    root: &Path,
    shard: &str,
) -> Result<Connection> {
    if let Some(conn) = state.shards.get(shard) {
        return Ok(conn.clone());
    }
    let conn = open_shard(root, shard).await?;
    state.shards.insert(shard.to_string(), conn.clone());
    Ok(conn)
}

async fn lookup(catalog: &Connection, conversation_id: &str) -> Result<Option<CollectionHandle>> {
    let conversation = conversation_id.to_string();
    catalog
        .call(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name, conversation_id, shard FROM collections \
                     WHERE conversation_id = ?",
                )
                ?;
            let handle = stmt
                .query_row([&conversation], |row| {
                    Ok(CollectionHandle {
                        name: row.get(0)?,
                        conversation_id: row.get(1)?,
                        shard: row.get(2)?,
                    })
                })
                .optional()
                ?;
            Ok(handle)
        })
        .await
        .map_err(storage_err)
}
