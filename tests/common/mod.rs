#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use fieldsync::application::ports::{
    ConnectivityObserver, CreateRequest, LocalStore, OperationQueue, PullQuery, RemoteError,
    RemotePage, RemoteRecord, RemoteService, SyncCheckpoint, UpdateRequest,
};
use fieldsync::application::services::{
    RecordService, RetryPolicy, SyncComponents, SyncOrchestrator, SyncSettings,
};
use fieldsync::domain::entities::{
    CustomerFields, JobFields, PhotoFields, Record, RecordData,
};
use fieldsync::domain::value_objects::{EntityType, LocalId, ServerId, TenantId};
use fieldsync::infrastructure::connectivity::ConnectivityMonitor;
use fieldsync::infrastructure::database::{
    ConnectionPool, SqliteLocalStore, SqliteOperationQueue,
};
use fieldsync::infrastructure::storage::MemorySyncCheckpoint;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub const TENANT: &str = "acme-field";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    List,
    Get,
    Create,
    Update,
    Delete,
    Upload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub op: RemoteOp,
    pub entity_type: EntityType,
    /// Server id, or the client id for creates.
    pub target: Option<String>,
    pub fields: Option<Value>,
    pub succeeded: bool,
}

#[derive(Debug, Clone)]
enum Failure {
    /// Fails without touching remote data.
    Before(RemoteError),
    /// Applies the change, then reports an error (lost acknowledgement).
    After(RemoteError),
}

struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[derive(Default)]
struct RemoteData {
    records: BTreeMap<(&'static str, String), RemoteRecord>,
    next_id: u64,
    calls: Vec<RemoteCall>,
    scripted: HashMap<(RemoteOp, EntityType), VecDeque<Failure>>,
    always: HashMap<(RemoteOp, EntityType), RemoteError>,
    delays: HashMap<(RemoteOp, EntityType), VecDeque<Duration>>,
    slow: HashMap<(RemoteOp, EntityType), Duration>,
    page_size: Option<usize>,
    list_gate: Option<Gate>,
}

/// Scripted in-memory stand-in for the backend.
#[derive(Default)]
pub struct FakeRemote {
    data: Mutex<RemoteData>,
}

/// Signals of a paused listing; see [`FakeRemote::pause_next_list`].
pub struct PausedList {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, op: RemoteOp, entity_type: EntityType, error: RemoteError) {
        self.data
            .lock()
            .unwrap()
            .scripted
            .entry((op, entity_type))
            .or_default()
            .push_back(Failure::Before(error));
    }

    pub fn lose_next_ack(&self, op: RemoteOp, entity_type: EntityType) {
        self.data
            .lock()
            .unwrap()
            .scripted
            .entry((op, entity_type))
            .or_default()
            .push_back(Failure::After(RemoteError::Timeout));
    }

    pub fn fail_always(&self, op: RemoteOp, entity_type: EntityType, error: RemoteError) {
        self.data
            .lock()
            .unwrap()
            .always
            .insert((op, entity_type), error);
    }

    pub fn clear_failures(&self) {
        let mut data = self.data.lock().unwrap();
        data.scripted.clear();
        data.always.clear();
    }

    /// The next call of `op` stalls for `delay` before the remote sees it.
    pub fn delay_next(&self, op: RemoteOp, entity_type: EntityType, delay: Duration) {
        self.data
            .lock()
            .unwrap()
            .delays
            .entry((op, entity_type))
            .or_default()
            .push_back(delay);
    }

    /// Every call of `op` stalls for `delay`; listings stall once per page.
    pub fn slow_down(&self, op: RemoteOp, entity_type: EntityType, delay: Duration) {
        self.data
            .lock()
            .unwrap()
            .slow
            .insert((op, entity_type), delay);
    }

    /// Splits listings into pages of at most `size` records.
    pub fn set_page_size(&self, size: usize) {
        self.data.lock().unwrap().page_size = Some(size.max(1));
    }

    /// The next listing blocks on its first page until `release` is notified.
    pub fn pause_next_list(&self) -> PausedList {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        self.data.lock().unwrap().list_gate = Some(Gate {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        });
        PausedList { entered, release }
    }

    /// Stores a record as if another device had created it.
    pub fn seed(
        &self,
        entity_type: EntityType,
        fields: Value,
        parent_server_id: Option<&ServerId>,
        updated_at: DateTime<Utc>,
    ) -> ServerId {
        let mut data = self.data.lock().unwrap();
        let server_id = next_server_id(&mut data);
        data.records.insert(
            key(entity_type, &server_id),
            RemoteRecord {
                server_id: server_id.clone(),
                entity_type,
                tenant_id: tenant(),
                client_id: None,
                parent_server_id: parent_server_id.cloned(),
                fields,
                updated_at,
                deleted: false,
            },
        );
        server_id
    }

    /// Server-side edit by someone else.
    pub fn edit(&self, entity_type: EntityType, server_id: &ServerId, patch: Value) {
        let mut data = self.data.lock().unwrap();
        let record = data
            .records
            .get_mut(&key(entity_type, &server_id))
            .expect("record to edit");
        merge_object(&mut record.fields, &patch);
        record.updated_at = Utc::now();
    }

    pub fn tombstone(&self, entity_type: EntityType, server_id: &ServerId) {
        let mut data = self.data.lock().unwrap();
        let record = data
            .records
            .get_mut(&key(entity_type, &server_id))
            .expect("record to delete");
        record.deleted = true;
        record.fields = Value::Null;
        record.updated_at = Utc::now();
    }

    /// Drops a record without a tombstone.
    pub fn forget(&self, entity_type: EntityType, server_id: &ServerId) {
        self.data
            .lock()
            .unwrap()
            .records
            .remove(&key(entity_type, &server_id));
    }

    pub fn record(&self, entity_type: EntityType, server_id: &ServerId) -> Option<RemoteRecord> {
        self.data
            .lock()
            .unwrap()
            .records
            .get(&key(entity_type, &server_id))
            .cloned()
    }

    pub fn live_records(&self, entity_type: EntityType) -> Vec<RemoteRecord> {
        self.data
            .lock()
            .unwrap()
            .records
            .values()
            .filter(|r| r.entity_type == entity_type && !r.deleted)
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.data.lock().unwrap().calls.clone()
    }

    pub fn calls_of(&self, op: RemoteOp) -> Vec<RemoteCall> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    /// Creates, updates and deletes the remote accepted, in arrival order.
    pub fn applied_mutations(&self) -> Vec<RemoteCall> {
        self.calls()
            .into_iter()
            .filter(|c| {
                c.succeeded && matches!(c.op, RemoteOp::Create | RemoteOp::Update | RemoteOp::Delete)
            })
            .collect()
    }

    async fn lag(&self, op: RemoteOp, entity_type: EntityType) {
        let delay = {
            let mut data = self.data.lock().unwrap();
            let scripted = data
                .delays
                .get_mut(&(op, entity_type))
                .and_then(|queue| queue.pop_front());
            scripted.or_else(|| data.slow.get(&(op, entity_type)).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn begin(
        &self,
        op: RemoteOp,
        entity_type: EntityType,
        target: Option<String>,
        fields: Option<Value>,
    ) -> Option<Failure> {
        let mut data = self.data.lock().unwrap();
        let scripted = data
            .scripted
            .get_mut(&(op, entity_type))
            .and_then(|queue| queue.pop_front());
        let failure = match scripted {
            Some(failure) => Some(failure),
            None => data.always.get(&(op, entity_type)).cloned().map(Failure::Before),
        };
        data.calls.push(RemoteCall {
            op,
            entity_type,
            target,
            fields,
            succeeded: !matches!(failure, Some(Failure::Before(_))),
        });
        failure
    }

    fn mark_last_failed(&self) {
        if let Some(call) = self.data.lock().unwrap().calls.last_mut() {
            call.succeeded = false;
        }
    }
}

fn key(entity_type: EntityType, server_id: &ServerId) -> (&'static str, String) {
    (entity_type.as_str(), server_id.as_str().to_string())
}

fn next_server_id(data: &mut RemoteData) -> ServerId {
    data.next_id += 1;
    ServerId::new(format!("srv-{}", data.next_id)).unwrap()
}

fn merge_object(target: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (target, patch) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn list_page(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        query: &PullQuery,
        cursor: Option<&str>,
    ) -> Result<RemotePage, RemoteError> {
        if cursor.is_none() {
            let gate = self.data.lock().unwrap().list_gate.take();
            if let Some(gate) = gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
        }
        self.lag(RemoteOp::List, entity_type).await;
        if let Some(Failure::Before(err)) =
            self.begin(RemoteOp::List, entity_type, cursor.map(str::to_string), None)
        {
            return Err(err);
        }

        let offset: usize = match cursor {
            Some(cursor) => cursor
                .parse()
                .map_err(|_| RemoteError::Rejected {
                    status: 400,
                    message: format!("bad cursor {cursor}"),
                })?,
            None => 0,
        };
        let data = self.data.lock().unwrap();
        let matching: Vec<RemoteRecord> = data
            .records
            .values()
            .filter(|r| r.entity_type == entity_type && &r.tenant_id == tenant_id)
            .filter(|r| r.updated_at >= query.window_start && r.updated_at <= query.window_end)
            .filter(|r| match query.modified_since {
                Some(since) => r.updated_at >= since,
                None => !r.deleted,
            })
            .cloned()
            .collect();
        let size = data.page_size.unwrap_or(usize::MAX);
        let records: Vec<RemoteRecord> = matching.iter().skip(offset).take(size).cloned().collect();
        let end = offset + records.len();
        Ok(RemotePage {
            records,
            next_cursor: (end < matching.len()).then(|| end.to_string()),
        })
    }

    async fn get(
        &self,
        _tenant_id: &TenantId,
        entity_type: EntityType,
        server_id: &ServerId,
    ) -> Result<RemoteRecord, RemoteError> {
        self.lag(RemoteOp::Get, entity_type).await;
        if let Some(Failure::Before(err)) = self.begin(
            RemoteOp::Get,
            entity_type,
            Some(server_id.to_string()),
            None,
        ) {
            return Err(err);
        }
        self.record(entity_type, server_id)
            .ok_or(RemoteError::NotFound)
    }

    async fn create(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        request: &CreateRequest,
    ) -> Result<RemoteRecord, RemoteError> {
        self.lag(RemoteOp::Create, entity_type).await;
        let failure = self.begin(
            RemoteOp::Create,
            entity_type,
            Some(request.client_id.to_string()),
            Some(request.fields.clone()),
        );
        if let Some(Failure::Before(err)) = &failure {
            return Err(err.clone());
        }
        let record = {
            let mut data = self.data.lock().unwrap();
            let server_id = next_server_id(&mut data);
            let record = RemoteRecord {
                server_id: server_id.clone(),
                entity_type,
                tenant_id: tenant_id.clone(),
                client_id: Some(request.client_id),
                parent_server_id: request.parent_server_id.clone(),
                fields: request.fields.clone(),
                updated_at: Utc::now(),
                deleted: false,
            };
            data.records
                .insert(key(entity_type, &server_id), record.clone());
            record
        };
        if let Some(Failure::After(err)) = failure {
            self.mark_last_failed();
            return Err(err);
        }
        Ok(record)
    }

    async fn update(
        &self,
        _tenant_id: &TenantId,
        entity_type: EntityType,
        server_id: &ServerId,
        request: &UpdateRequest,
    ) -> Result<RemoteRecord, RemoteError> {
        self.lag(RemoteOp::Update, entity_type).await;
        let failure = self.begin(
            RemoteOp::Update,
            entity_type,
            Some(server_id.to_string()),
            Some(request.fields.clone()),
        );
        if let Some(Failure::Before(err)) = &failure {
            return Err(err.clone());
        }
        let updated = {
            let mut data = self.data.lock().unwrap();
            match data
                .records
                .get_mut(&key(entity_type, &server_id))
            {
                Some(record) if !record.deleted => {
                    merge_object(&mut record.fields, &request.fields);
                    if request.parent_server_id.is_some() {
                        record.parent_server_id = request.parent_server_id.clone();
                    }
                    record.updated_at = Utc::now();
                    Some(record.clone())
                }
                _ => None,
            }
        };
        let Some(updated) = updated else {
            self.mark_last_failed();
            return Err(RemoteError::NotFound);
        };
        if let Some(Failure::After(err)) = failure {
            self.mark_last_failed();
            return Err(err);
        }
        Ok(updated)
    }

    async fn delete(
        &self,
        _tenant_id: &TenantId,
        entity_type: EntityType,
        server_id: &ServerId,
    ) -> Result<(), RemoteError> {
        self.lag(RemoteOp::Delete, entity_type).await;
        if let Some(Failure::Before(err)) = self.begin(
            RemoteOp::Delete,
            entity_type,
            Some(server_id.to_string()),
            None,
        ) {
            return Err(err);
        }
        let mut data = self.data.lock().unwrap();
        match data
            .records
            .get_mut(&key(entity_type, &server_id))
        {
            Some(record) if !record.deleted => {
                record.deleted = true;
                record.fields = Value::Null;
                record.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(RemoteError::NotFound),
        }
    }

    async fn upload_attachment(
        &self,
        _tenant_id: &TenantId,
        entity_type: EntityType,
        server_id: &ServerId,
        _content_type: &str,
        payload: Bytes,
    ) -> Result<String, RemoteError> {
        self.lag(RemoteOp::Upload, entity_type).await;
        if let Some(Failure::Before(err)) = self.begin(
            RemoteOp::Upload,
            entity_type,
            Some(server_id.to_string()),
            Some(json!({ "bytes": payload.len() })),
        ) {
            return Err(err);
        }
        let url = format!("https://files.example.test/{}", server_id);
        let mut data = self.data.lock().unwrap();
        if let Some(record) = data
            .records
            .get_mut(&key(entity_type, &server_id))
        {
            merge_object(&mut record.fields, &json!({ "remote_url": url }));
            record.updated_at = Utc::now();
        }
        Ok(url)
    }
}

pub struct TestContext {
    pub tenant: TenantId,
    pub pool: ConnectionPool,
    pub store: Arc<SqliteLocalStore>,
    pub queue: Arc<SqliteOperationQueue>,
    pub remote: Arc<FakeRemote>,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub checkpoint: Arc<MemorySyncCheckpoint>,
    pub orchestrator: SyncOrchestrator,
    pub records: RecordService,
}

pub fn tenant() -> TenantId {
    TenantId::new(TENANT.to_string()).unwrap()
}

pub fn test_settings() -> SyncSettings {
    SyncSettings {
        batch_size: 50,
        max_push_rounds: 8,
        request_timeout: Duration::from_secs(2),
        lookback: chrono::Duration::days(30),
        lookahead: chrono::Duration::days(30),
        overlap: chrono::Duration::seconds(60),
        full_refresh_every: 12,
    }
}

pub async fn setup() -> TestContext {
    setup_with(test_settings(), true).await
}

pub async fn setup_with(settings: SyncSettings, online: bool) -> TestContext {
    let pool = ConnectionPool::from_memory()
        .await
        .expect("in-memory sqlite");
    pool.migrate().await.expect("migrations");

    let store = Arc::new(SqliteLocalStore::new(pool.clone()));
    let queue = Arc::new(SqliteOperationQueue::new(
        pool.clone(),
        RetryPolicy::immediate(3),
    ));
    let remote = Arc::new(FakeRemote::new());
    let connectivity = Arc::new(ConnectivityMonitor::new(online));
    let checkpoint = Arc::new(MemorySyncCheckpoint::new());

    let orchestrator = SyncOrchestrator::new(
        tenant(),
        SyncComponents {
            store: Arc::clone(&store) as Arc<dyn LocalStore>,
            queue: Arc::clone(&queue) as Arc<dyn OperationQueue>,
            remote: Arc::clone(&remote) as Arc<dyn RemoteService>,
            connectivity: Arc::clone(&connectivity) as Arc<dyn ConnectivityObserver>,
            checkpoint: Arc::clone(&checkpoint) as Arc<dyn SyncCheckpoint>,
        },
        settings,
    );
    orchestrator.recover().await.expect("recover");
    let records = RecordService::new(
        Arc::clone(&store) as Arc<dyn LocalStore>,
        orchestrator.clone(),
    );

    TestContext {
        tenant: tenant(),
        pool,
        store,
        queue,
        remote,
        connectivity,
        checkpoint,
        orchestrator,
        records,
    }
}

pub fn customer(name: &str) -> RecordData {
    RecordData::Customer(CustomerFields {
        name: name.to_string(),
        phone: None,
        email: None,
        notes: None,
    })
}

pub fn job(title: &str) -> RecordData {
    RecordData::Job(JobFields {
        title: title.to_string(),
        description: None,
        status: "scheduled".to_string(),
        scheduled_start: None,
        scheduled_end: None,
        customer_name: None,
        customer_phone: None,
        service_address: None,
    })
}

pub fn photo(path: Option<&str>) -> RecordData {
    RecordData::Photo(PhotoFields {
        caption: Some("meter".to_string()),
        content_type: "image/jpeg".to_string(),
        remote_url: None,
        local_path: path.map(str::to_string),
        uploaded: false,
    })
}

pub fn job_fields(title: &str) -> Value {
    json!({
        "title": title,
        "description": null,
        "status": "scheduled",
        "scheduled_start": null,
        "scheduled_end": null,
        "customer_name": null,
        "customer_phone": null,
        "service_address": null,
    })
}

pub fn customer_fields(name: &str) -> Value {
    json!({ "name": name, "phone": null, "email": null, "notes": null })
}

pub fn job_title(record: &Record) -> String {
    match &record.data {
        RecordData::Job(fields) => fields.title.clone(),
        other => panic!("expected a job, got {other:?}"),
    }
}

pub fn job_status(record: &Record) -> String {
    match &record.data {
        RecordData::Job(fields) => fields.status.clone(),
        other => panic!("expected a job, got {other:?}"),
    }
}

pub async fn find_by_server_id(
    ctx: &TestContext,
    entity_type: EntityType,
    server_id: &ServerId,
) -> Option<Record> {
    ctx.store
        .find_by_server_id(&ctx.tenant, entity_type, server_id)
        .await
        .expect("lookup")
}

pub async fn local(
    ctx: &TestContext,
    entity_type: EntityType,
    local_id: LocalId,
) -> Option<Record> {
    ctx.store.get(entity_type, local_id).await.expect("get")
}

/// Runs one cycle and expects it to have run.
pub async fn sync(ctx: &TestContext) -> fieldsync::application::services::CycleReport {
    match ctx.orchestrator.request_sync().await {
        fieldsync::application::services::CycleOutcome::Completed(report) => report,
        other => panic!("expected a completed cycle, got {other:?}"),
    }
}
