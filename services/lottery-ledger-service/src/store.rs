// =============================================================================
// STORE MODULE
// =============================================================================
// Persistence contract for the ledger and sales collections, plus an in-memory
// backend for development and tests. The Postgres backend lives in db.rs.
//
// CONCURRENCY CONTRACT:
//   update_* takes the version the caller read. The write only lands when
//   the stored version still matches; the stored version is then bumped by
//   one and the new record returned. A mismatch (or a vanished row) returns
//   Ok(None) and the caller decides whether to reload and retry.
// =============================================================================

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{BoxRecord, DailySales, PackStatus, TicketPack};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ----- boxes -----
    async fn insert_box(&self, record: &BoxRecord) -> AppResult<BoxRecord>;
    async fn get_box(&self, id: Uuid) -> AppResult<Option<BoxRecord>>;
    async fn find_box_by_number(&self, store_id: &str, box_number: &str)
        -> AppResult<Option<BoxRecord>>;
    /// Active boxes of a store, most recently updated first
    async fn list_active_boxes(&self, store_id: &str) -> AppResult<Vec<BoxRecord>>;
    async fn update_box(&self, record: &BoxRecord, expected_version: i64)
        -> AppResult<Option<BoxRecord>>;

    // ----- ticket packs -----
    async fn insert_pack(&self, pack: &TicketPack) -> AppResult<TicketPack>;
    async fn get_pack(&self, id: Uuid) -> AppResult<Option<TicketPack>>;
    /// Packs of a store, filtered by status when given. Ordering: active by
    /// game number, inactive by deactivation date (newest first), returned
    /// by return date (newest first), unfiltered by most recent update.
    async fn list_packs(&self, store_id: &str, status: Option<PackStatus>)
        -> AppResult<Vec<TicketPack>>;
    async fn update_pack(&self, pack: &TicketPack, expected_version: i64)
        -> AppResult<Option<TicketPack>>;

    // ----- daily sales -----
    /// Fails with a validation error if the store already has a record for
    /// that day
    async fn insert_sales(&self, record: &DailySales) -> AppResult<DailySales>;
    async fn get_sales(&self, id: Uuid) -> AppResult<Option<DailySales>>;
    async fn find_sales_by_date(&self, store_id: &str, date: NaiveDate)
        -> AppResult<Option<DailySales>>;
    /// Records with `from <= sales_date <= to`, oldest first
    async fn list_sales(&self, store_id: &str, from: NaiveDate, to: NaiveDate)
        -> AppResult<Vec<DailySales>>;
    async fn update_sales(&self, record: &DailySales, expected_version: i64)
        -> AppResult<Option<DailySales>>;

    async fn health_check(&self) -> bool;
}

// =============================================================================
// IN-MEMORY BACKEND
// =============================================================================
/// HashMap-backed store. Each collection sits behind a RwLock, so the
/// version check and the write happen under one write guard.
#[derive(Default)]
pub struct MemoryStore {
    boxes: RwLock<HashMap<Uuid, BoxRecord>>,
    packs: RwLock<HashMap<Uuid, TicketPack>>,
    sales: RwLock<HashMap<Uuid, DailySales>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_box(&self, record: &BoxRecord) -> AppResult<BoxRecord> {
        let mut boxes = self.boxes.write().await;
        let duplicate = boxes
            .values()
            .any(|b| b.store_id == record.store_id && b.box_number == record.box_number);
        if duplicate || boxes.contains_key(&record.id) {
            return Err(AppError::Validation(format!(
                "box {} already exists in store {}",
                record.box_number, record.store_id
            )));
        }
        boxes.insert(record.id, record.clone());
        Ok(record.clone())
    }

    async fn get_box(&self, id: Uuid) -> AppResult<Option<BoxRecord>> {
        Ok(self.boxes.read().await.get(&id).cloned())
    }

    async fn find_box_by_number(
        &self,
        store_id: &str,
        box_number: &str,
    ) -> AppResult<Option<BoxRecord>> {
        Ok(self
            .boxes
            .read()
            .await
            .values()
            .find(|b| b.store_id == store_id && b.box_number == box_number)
            .cloned())
    }

    async fn list_active_boxes(&self, store_id: &str) -> AppResult<Vec<BoxRecord>> {
        let mut boxes: Vec<BoxRecord> = self
            .boxes
            .read()
            .await
            .values()
            .filter(|b| b.store_id == store_id && b.is_active)
            .cloned()
            .collect();
        boxes.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(boxes)
    }

    async fn update_box(
        &self,
        record: &BoxRecord,
        expected_version: i64,
    ) -> AppResult<Option<BoxRecord>> {
        let mut boxes = self.boxes.write().await;
        match boxes.get_mut(&record.id) {
            Some(stored) if stored.version == expected_version => {
                let mut next = record.clone();
                next.version = expected_version + 1;
                *stored = next.clone();
                Ok(Some(next))
            }
            _ => Ok(None),
        }
    }

    async fn insert_pack(&self, pack: &TicketPack) -> AppResult<TicketPack> {
        let mut packs = self.packs.write().await;
        if packs.contains_key(&pack.id) {
            return Err(AppError::Validation(format!("ticket pack {} already exists", pack.id)));
        }
        packs.insert(pack.id, pack.clone());
        Ok(pack.clone())
    }

    async fn get_pack(&self, id: Uuid) -> AppResult<Option<TicketPack>> {
        Ok(self.packs.read().await.get(&id).cloned())
    }

    async fn list_packs(
        &self,
        store_id: &str,
        status: Option<PackStatus>,
    ) -> AppResult<Vec<TicketPack>> {
        let mut packs: Vec<TicketPack> = self
            .packs
            .read()
            .await
            .values()
            .filter(|p| p.store_id == store_id && status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        match status {
            Some(PackStatus::Active) => packs.sort_by(|a, b| a.game_number.cmp(&b.game_number)),
            Some(PackStatus::Inactive) => {
                packs.sort_by(|a, b| b.deactivation_date.cmp(&a.deactivation_date))
            }
            Some(PackStatus::Returned) => packs.sort_by(|a, b| b.return_date.cmp(&a.return_date)),
            None => packs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
        }
        Ok(packs)
    }

    async fn update_pack(
        &self,
        pack: &TicketPack,
        expected_version: i64,
    ) -> AppResult<Option<TicketPack>> {
        let mut packs = self.packs.write().await;
        match packs.get_mut(&pack.id) {
            Some(stored) if stored.version == expected_version => {
                let mut next = pack.clone();
                next.version = expected_version + 1;
                *stored = next.clone();
                Ok(Some(next))
            }
            _ => Ok(None),
        }
    }

    async fn insert_sales(&self, record: &DailySales) -> AppResult<DailySales> {
        let mut sales = self.sales.write().await;
        let duplicate = sales
            .values()
            .any(|s| s.store_id == record.store_id && s.sales_date == record.sales_date);
        if duplicate || sales.contains_key(&record.id) {
            return Err(AppError::Validation(format!(
                "sales for {} in store {} already exist",
                record.sales_date, record.store_id
            )));
        }
        sales.insert(record.id, record.clone());
        Ok(record.clone())
    }

    async fn get_sales(&self, id: Uuid) -> AppResult<Option<DailySales>> {
        Ok(self.sales.read().await.get(&id).cloned())
    }

    async fn find_sales_by_date(
        &self,
        store_id: &str,
        date: NaiveDate,
    ) -> AppResult<Option<DailySales>> {
        Ok(self
            .sales
            .read()
            .await
            .values()
            .find(|s| s.store_id == store_id && s.sales_date == date)
            .cloned())
    }

    async fn list_sales(
        &self,
        store_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<DailySales>> {
        let mut sales: Vec<DailySales> = self
            .sales
            .read()
            .await
            .values()
            .filter(|s| s.store_id == store_id && (from..=to).contains(&s.sales_date))
            .cloned()
            .collect();
        sales.sort_by_key(|s| s.sales_date);
        Ok(sales)
    }

    async fn update_sales(
        &self,
        record: &DailySales,
        expected_version: i64,
    ) -> AppResult<Option<DailySales>> {
        let mut sales = self.sales.write().await;
        match sales.get_mut(&record.id) {
            Some(stored) if stored.version == expected_version => {
                let mut next = record.clone();
                next.version = expected_version + 1;
                *stored = next.clone();
                Ok(Some(next))
            }
            _ => Ok(None),
        }
    }

    async fn health_check(&self) -> bool {
        true
    }
}
