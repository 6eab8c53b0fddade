use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use bastion_core::approvals::ApprovalStore;
use bastion_core::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
use bastion_core::domain::operation::{IncidentId, OperationId, RiskLevel};
use bastion_core::errors::StoreError;

use super::RepositoryError;
use crate::DbPool;

const APPROVAL_COLUMNS: &str = "approval_id, operation_id, incident_id, action_type, target_resource,
     risk_level, risk_assessment, status, created_at, expires_at, approver, comments, decided_at";

/// `ApprovalStore` backed by the `approval_request` table.
pub struct SqlApprovalStore {
    pool: DbPool,
}

impl SqlApprovalStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode<T>(result: Result<T, sqlx::Error>) -> Result<T, RepositoryError> {
    result.map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn row_to_approval(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let risk_level_str: String = decode(row.try_get("risk_level"))?;
    let status_str: String = decode(row.try_get("status"))?;
    let created_at_str: String = decode(row.try_get("created_at"))?;
    let expires_at_str: String = decode(row.try_get("expires_at"))?;
    let decided_at_str: Option<String> = decode(row.try_get("decided_at"))?;

    let risk_level = RiskLevel::parse(&risk_level_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown risk level `{risk_level_str}`")))?;
    let status = ApprovalStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown approval status `{status_str}`")))?;
    let decided_at = decided_at_str
        .as_deref()
        .map(|value| parse_timestamp("decided_at", value))
        .transpose()?;

    Ok(ApprovalRequest {
        approval_id: ApprovalId(decode(row.try_get("approval_id"))?),
        operation_id: OperationId(decode(row.try_get("operation_id"))?),
        incident_id: IncidentId(decode(row.try_get("incident_id"))?),
        action_type: decode(row.try_get("action_type"))?,
        target_resource: decode(row.try_get("target_resource"))?,
        risk_level,
        risk_assessment: decode(row.try_get("risk_assessment"))?,
        status,
        created_at: parse_timestamp("created_at", &created_at_str)?,
        expires_at: parse_timestamp("expires_at", &expires_at_str)?,
        approver: decode(row.try_get("approver"))?,
        comments: decode(row.try_get("comments"))?,
        decided_at,
    })
}

impl SqlApprovalStore {
    async fn insert_row(&self, request: &ApprovalRequest) -> Result<(), RepositoryError> {
        sqlx::query(&format!(
            "INSERT INTO approval_request ({APPROVAL_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&request.approval_id.0)
        .bind(&request.operation_id.0)
        .bind(&request.incident_id.0)
        .bind(&request.action_type)
        .bind(&request.target_resource)
        .bind(request.risk_level.as_str())
        .bind(&request.risk_assessment)
        .bind(request.status.as_str())
        .bind(request.created_at.to_rfc3339())
        .bind(request.expires_at.to_rfc3339())
        .bind(&request.approver)
        .bind(&request.comments)
        .bind(request.decided_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(
        &self,
        approval_id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_request WHERE approval_id = ?"
        ))
        .bind(&approval_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_approval).transpose()
    }

    async fn compare_and_set(&self, request: &ApprovalRequest) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE approval_request
             SET status = ?, approver = ?, comments = ?, decided_at = ?
             WHERE approval_id = ? AND status = 'pending'
               AND (? = 'expired' OR julianday(expires_at) >= julianday(?))",
        )
        .bind(request.status.as_str())
        .bind(&request.approver)
        .bind(&request.comments)
        .bind(request.decided_at.map(|dt| dt.to_rfc3339()))
        .bind(&request.approval_id.0)
        .bind(request.status.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_by_status(
        &self,
        status: ApprovalStatus,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_request
             WHERE status = ? ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_approval).collect()
    }
}

#[async_trait]
impl ApprovalStore for SqlApprovalStore {
    async fn insert(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        Ok(self.insert_row(request).await?)
    }

    async fn get(&self, approval_id: &ApprovalId) -> Result<Option<ApprovalRequest>, StoreError> {
        Ok(self.find_by_id(approval_id).await?)
    }

    async fn update_if_pending(&self, request: &ApprovalRequest) -> Result<bool, StoreError> {
        Ok(self.compare_and_set(request).await?)
    }

    async fn list_by_status(
        &self,
        status: ApprovalStatus,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        Ok(self.find_by_status(status).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use bastion_core::approvals::ApprovalStore;
    use bastion_core::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
    use bastion_core::domain::operation::{IncidentId, OperationId, RiskLevel};

    use super::SqlApprovalStore;
    use crate::{connect_with_settings, migrations};

    async fn store() -> SqlApprovalStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlApprovalStore::new(pool)
    }

    fn pending(id: &str) -> ApprovalRequest {
        let created_at = Utc::now();
        ApprovalRequest {
            approval_id: ApprovalId(id.to_string()),
            operation_id: OperationId(format!("op-{id}")),
            incident_id: IncidentId("inc-1".to_string()),
            action_type: "stop_instance".to_string(),
            target_resource: "web-1".to_string(),
            risk_level: RiskLevel::High,
            risk_assessment: "high risk compute action".to_string(),
            status: ApprovalStatus::Pending,
            created_at,
            expires_at: created_at + Duration::hours(24),
            approver: None,
            comments: None,
            decided_at: None,
        }
    }

    #[tokio::test]
    async fn inserted_requests_read_back_intact() {
        let store = store().await;
        let request = pending("apr-1");
        store.insert(&request).await.expect("insert");

        let loaded = store.get(&request.approval_id).await.expect("get").expect("present");

        assert_eq!(loaded.operation_id, request.operation_id);
        assert_eq!(loaded.risk_level, RiskLevel::High);
        assert_eq!(loaded.status, ApprovalStatus::Pending);
        assert_eq!(loaded.expires_at.timestamp(), request.expires_at.timestamp());
        assert!(store.get(&ApprovalId("missing".to_string())).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn duplicate_ids_are_refused() {
        let store = store().await;
        store.insert(&pending("apr-dup")).await.expect("first insert");

        assert!(store.insert(&pending("apr-dup")).await.is_err());
    }

    #[tokio::test]
    async fn only_the_first_decision_lands() {
        let store = store().await;
        let request = pending("apr-2");
        store.insert(&request).await.expect("insert");

        let mut approved = request.clone();
        approved.status = ApprovalStatus::Approved;
        approved.approver = Some("alice@example.com".to_string());
        approved.decided_at = Some(Utc::now());
        let mut rejected = request.clone();
        rejected.status = ApprovalStatus::Rejected;
        rejected.approver = Some("bob@example.com".to_string());

        assert!(store.update_if_pending(&approved).await.expect("first decision"));
        assert!(!store.update_if_pending(&rejected).await.expect("second decision"));

        let stored = store.get(&request.approval_id).await.expect("get").expect("present");
        assert_eq!(stored.status, ApprovalStatus::Approved);
        assert_eq!(stored.approver.as_deref(), Some("alice@example.com"));
        assert!(stored.decided_at.is_some());
    }

    #[tokio::test]
    async fn lapsed_requests_only_accept_expiry() {
        let store = store().await;
        let mut request = pending("apr-lapsed");
        request.created_at = Utc::now() - Duration::hours(2);
        request.expires_at = Utc::now() - Duration::hours(1);
        store.insert(&request).await.expect("insert");

        let mut approved = request.clone();
        approved.status = ApprovalStatus::Approved;
        approved.approver = Some("alice@example.com".to_string());
        approved.decided_at = Some(Utc::now());
        assert!(!store.update_if_pending(&approved).await.expect("late decision"));

        let mut expired = request.clone();
        expired.status = ApprovalStatus::Expired;
        expired.decided_at = Some(Utc::now());
        assert!(store.update_if_pending(&expired).await.expect("expiry"));

        let stored = store.get(&request.approval_id).await.expect("get").expect("present");
        assert_eq!(stored.status, ApprovalStatus::Expired);
        assert_eq!(stored.approver, None);
    }

    #[tokio::test]
    async fn listing_filters_by_status_oldest_first() {
        let store = store().await;
        let mut older = pending("apr-old");
        older.created_at = Utc::now() - Duration::minutes(5);
        let newer = pending("apr-new");
        let mut decided = pending("apr-done");
        decided.status = ApprovalStatus::AutoApproved;
        for request in [&newer, &decided, &older] {
            store.insert(request).await.expect("insert");
        }

        let listed = store.list_by_status(ApprovalStatus::Pending).await.expect("list");
        let ids: Vec<&str> = listed.iter().map(|request| request.approval_id.0.as_str()).collect();

        assert_eq!(ids, vec!["apr-old", "apr-new"]);
    }
}
