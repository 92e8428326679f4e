// src/linking/db.rs - PostgreSQL canonical registry
use async_trait::async_trait;
use log::debug;

use super::registry::RegistryStore;
use crate::error::StorageError;
use crate::models::records::{CanonicalParty, CanonicalPerson, EntityId};
use crate::utils::db_connect::PgPool;

pub struct PgRegistry {
    pool: PgPool,
}

impl PgRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RegistryStore for PgRegistry {
    async fn load_persons(&self) -> Result<Vec<CanonicalPerson>, StorageError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query("SELECT id, name, last_name FROM public.person ORDER BY id", &[])
            .await?;
        let persons = rows
            .iter()
            .map(|row| -> Result<CanonicalPerson, StorageError> {
                Ok(CanonicalPerson {
                    id: row.try_get("id")?,
                    name: row.try_get::<_, Option<String>>("name")?.unwrap_or_default(),
                    last_name: row.try_get::<_, Option<String>>("last_name")?.unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Loaded {} canonical persons", persons.len());
        Ok(persons)
    }

    async fn load_parties(&self) -> Result<Vec<CanonicalParty>, StorageError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query("SELECT id, denomination FROM public.party ORDER BY id", &[])
            .await?;
        let parties = rows
            .iter()
            .map(|row| -> Result<CanonicalParty, StorageError> {
                Ok(CanonicalParty {
                    id: row.try_get("id")?,
                    denomination: row.try_get("denomination")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Loaded {} canonical parties", parties.len());
        Ok(parties)
    }

    async fn upsert_person(&self, name: &str, last_name: &str) -> Result<EntityId, StorageError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_one(
                "INSERT INTO public.person (name, last_name) VALUES ($1, $2)
                 ON CONFLICT (name, last_name) DO UPDATE SET name = EXCLUDED.name
                 RETURNING id",
                &[&name, &last_name],
            )
            .await?;
        Ok(row.try_get("id")?)
    }

    async fn upsert_party(&self, denomination: &str) -> Result<EntityId, StorageError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_one(
                "INSERT INTO public.party (denomination) VALUES ($1)
                 ON CONFLICT (denomination) DO UPDATE SET denomination = EXCLUDED.denomination
                 RETURNING id",
                &[&denomination],
            )
            .await?;
        Ok(row.try_get("id")?)
    }
}
