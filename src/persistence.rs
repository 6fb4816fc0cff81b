//! Database persistence layer for HelixChain

use crate::blockchain::ChainData;
use crate::crypto::Hash;
use crate::error::ChainError;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::sync::Mutex;

/// Abstraction for persistence backends. Implementations store the full
/// fork tree plus the current head pointer. The chain writes every push
/// as one `save_batch` call before it updates its in-memory state, so a
/// batch must land atomically: either all rows and the head pointer, or
/// nothing.
pub trait Persistence: Send + Sync {
    fn save_batch(&self, updates: &[(Hash, ChainData)], head: &Hash) -> Result<(), ChainError>;
    fn remove_chain_data(&self, hash: &Hash) -> Result<(), ChainError>;
    fn load_chain_data(&self) -> Result<Vec<(Hash, ChainData)>, ChainError>;
    fn load_head(&self) -> Result<Option<Hash>, ChainError>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, ChainError> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chain_data (
                hash BLOB PRIMARY KEY,
                height INTEGER NOT NULL,
                on_main_chain INTEGER NOT NULL,
                data TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!("Failed to create chain_data table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!("Failed to create metadata table: {}", e))
        })?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ChainError> {
        self.conn
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))
    }
}

impl Persistence for Database {
    fn save_batch(&self, updates: &[(Hash, ChainData)], head: &Hash) -> Result<(), ChainError> {
        let mut serialized = Vec::with_capacity(updates.len());
        for (hash, data) in updates {
            let data_json = serde_json::to_string(data).map_err(|e| {
                ChainError::DatabaseError(format!("Failed to serialize chain data: {}", e))
            })?;
            serialized.push((hash, data, data_json));
        }

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| ChainError::DatabaseError(format!("Failed to begin batch: {}", e)))?;
        for (hash, data, data_json) in serialized {
            tx.execute(
                "INSERT OR REPLACE INTO chain_data (hash, height, on_main_chain, data)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    hash.to_vec(),
                    data.height() as i64,
                    data.on_main_chain as i64,
                    data_json,
                ],
            )
            .map_err(|e| ChainError::DatabaseError(format!("Failed to save chain data: {}", e)))?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('head', ?1)",
            params![hex::encode(head)],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save head: {}", e)))?;
        tx.commit()
            .map_err(|e| ChainError::DatabaseError(format!("Failed to commit batch: {}", e)))?;

        Ok(())
    }

    fn remove_chain_data(&self, hash: &Hash) -> Result<(), ChainError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM chain_data WHERE hash = ?1",
            params![hash.to_vec()],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to remove chain data: {}", e)))?;
        Ok(())
    }

    fn load_chain_data(&self) -> Result<Vec<(Hash, ChainData)>, ChainError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT hash, data FROM chain_data ORDER BY height ASC")
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                let hash_bytes: Vec<u8> = row.get(0)?;
                let data_json: String = row.get(1)?;
                Ok((hash_bytes, data_json))
            })
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query chain data: {}", e)))?;

        let mut entries = Vec::new();
        for row_result in rows {
            let (hash_bytes, data_json) = row_result
                .map_err(|e| ChainError::DatabaseError(format!("Failed to read row: {}", e)))?;

            if hash_bytes.len() != 32 {
                return Err(ChainError::DatabaseError(
                    "Stored block hash has wrong length".to_string(),
                ));
            }
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&hash_bytes);

            let data: ChainData = serde_json::from_str(&data_json).map_err(|e| {
                ChainError::DatabaseError(format!("Failed to deserialize chain data: {}", e))
            })?;
            entries.push((hash, data));
        }

        Ok(entries)
    }

    fn load_head(&self) -> Result<Option<Hash>, ChainError> {
        let conn = self.lock()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'head'",
                [],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(ChainError::DatabaseError(format!(
                    "Failed to load head: {}",
                    other
                ))),
            })?;

        match value {
            Some(hex_str) => {
                let bytes = hex::decode(&hex_str).map_err(|e| {
                    ChainError::DatabaseError(format!("Stored head is not valid hex: {}", e))
                })?;
                if bytes.len() != 32 {
                    return Err(ChainError::DatabaseError(
                        "Stored head hash has wrong length".to_string(),
                    ));
                }
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                Ok(Some(hash))
            }
            None => Ok(None),
        }
    }
}

/// In-memory persistence backend, used for tests and ephemeral nodes.
#[derive(Default)]
pub struct InMemoryPersistence {
    chain_data: Mutex<HashMap<Hash, ChainData>>,
    head: Mutex<Option<Hash>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        InMemoryPersistence::default()
    }
}

impl Persistence for InMemoryPersistence {
    fn save_batch(&self, updates: &[(Hash, ChainData)], head: &Hash) -> Result<(), ChainError> {
        let mut store = self
            .chain_data
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))?;
        for (hash, data) in updates {
            store.insert(*hash, data.clone());
        }
        let mut stored_head = self
            .head
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))?;
        *stored_head = Some(*head);
        Ok(())
    }

    fn remove_chain_data(&self, hash: &Hash) -> Result<(), ChainError> {
        let mut store = self
            .chain_data
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))?;
        store.remove(hash);
        Ok(())
    }

    fn load_chain_data(&self) -> Result<Vec<(Hash, ChainData)>, ChainError> {
        let store = self
            .chain_data
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))?;
        Ok(store.iter().map(|(h, d)| (*h, d.clone())).collect())
    }

    fn load_head(&self) -> Result<Option<Hash>, ChainError> {
        let head = self
            .head
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))?;
        Ok(*head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, BlockBody, BlockHeader};
    use crate::policy;

    fn sample_chain_data() -> (Hash, ChainData) {
        let body = BlockBody {
            miner_address: [1u8; 20],
            transactions: Vec::new(),
        };
        let block = Block {
            header: BlockHeader {
                height: 3,
                timestamp: 3 * policy::BLOCK_TIME,
                prev_hash: [2u8; 32],
                accounts_hash: [3u8; 32],
                body_hash: body.hash(),
                difficulty: policy::MIN_DIFFICULTY,
                nonce: 42,
            },
            body,
        };
        (block.hash(), ChainData::initial(block))
    }

    #[test]
    fn test_in_memory_round_trip() {
        let persistence = InMemoryPersistence::new();
        let (hash, data) = sample_chain_data();

        persistence
            .save_batch(&[(hash, data)], &hash)
            .expect("save batch");

        let entries = persistence.load_chain_data().expect("load");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, hash);
        assert_eq!(entries[0].1.block.hash(), hash);
        assert_eq!(persistence.load_head().expect("load head"), Some(hash));

        persistence.remove_chain_data(&hash).expect("remove");
        assert!(persistence.load_chain_data().expect("load").is_empty());
    }

    #[test]
    fn test_database_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chain.db");
        let db = Database::open(path.to_str().expect("utf-8 path")).expect("open");

        assert_eq!(db.load_head().expect("load head"), None);

        let (hash, data) = sample_chain_data();
        db.save_batch(&[(hash, data)], &hash).expect("save batch");

        // Reopen to prove the data actually hit the file.
        drop(db);
        let db = Database::open(path.to_str().expect("utf-8 path")).expect("reopen");
        let entries = db.load_chain_data().expect("load");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.block.header.nonce, 42);
        assert_eq!(db.load_head().expect("load head"), Some(hash));

        db.remove_chain_data(&hash).expect("remove");
        assert!(db.load_chain_data().expect("load").is_empty());
    }
}
