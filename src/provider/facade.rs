//! Data Provider Facade.
//!
//! [`DataProvider`] is the public surface of the engine for one dataset
//! connection: it installs and uninstalls the tables of a model type and
//! runs Add, Update, Remove, Get and Query against them. Schemas and
//! statements are built once per type and cached; connections come from the
//! pool unless a [`TransactionScope`](super::TransactionScope) has pinned a
//! dedicated one.
//!
//! Every write runs inside a transaction. When the connection is already in
//! one (a scope is active), the operation joins it; otherwise the provider
//! begins its own and commits only on success.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::connection::{Connection, ConnectionFactory, ExecResult, IsolationLevel, Statement};
use super::pool::{ConnectionPool, PooledConnection, SharedConnection};
use crate::cache::{SchemaSet, StatementCache, StatementKind};
use crate::config::{ConnectionInfo, Settings};
use crate::error::{AddOutcome, ConfigError, DbError, Error, Result, UpdateOutcome};
use crate::introspect::{object_exists, ObjectKind, SchemaCache};
use crate::mapper::{assign_children, check_fields, column_value, hydrate_row, param_name};
use crate::mapper::{Field, Params, Record, Row, Value};
use crate::metadata::{Inheritance, Inspector, ModelType, TypeRegistry};
use crate::migrate::{probe_rows, MigrationPlan, TableState};
use crate::schema::{LanguageSet, SchemaBuilder, SubtableLink, TableSchema, PARENT_COLUMN};
use crate::statement::procedure::{self, procedure_name};
use crate::statement::select::TOTAL_COLUMN;
use crate::statement::{crud, decode_descriptor, derived, plan_select};
use crate::statement::{KeyKind, ProcedureKind, QuerySpec, SelectPlan, Synthetic, ORIGINAL_PREFIX};

/// Parent values bound per child read.
const PARENT_BATCH: usize = 100;

/// Per-provider settings.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub connection_string: String,
    /// Schema (owner) of every generated object.
    pub schema: String,
    /// Site value written to and filtered on for site-scoped tables.
    pub site: Option<String>,
    pub languages: LanguageSet,
    pub emit_procedures: bool,
    /// Rows per page for export, import and translation sweeps.
    pub export_chunk_size: usize,
    pub statement_timeout: Duration,
}

impl ProviderOptions {
    pub fn new(connection_string: impl Into<String>, languages: LanguageSet) -> Self {
        Self {
            connection_string: connection_string.into(),
            schema: "dbo".to_string(),
            site: None,
            languages,
            emit_procedures: false,
            export_chunk_size: 500,
            statement_timeout: Duration::from_secs(600),
        }
    }

    /// Options for a dataset from loaded settings.
    pub fn from_settings(settings: &Settings, dataset: &str) -> Result<Self> {
        let connection = settings.connection_for(dataset)?;
        let languages = LanguageSet::new(&settings.engine.languages)?;
        Ok(Self {
            connection_string: connection.resolved_connection_string()?,
            schema: settings.schema_for(dataset).to_string(),
            site: settings.engine.site.clone(),
            languages,
            emit_procedures: settings.engine.emit_procedures,
            export_chunk_size: settings.engine.export_chunk_size,
            statement_timeout: settings.engine.statement_timeout(),
        })
    }

    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    #[must_use]
    pub fn site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    #[must_use]
    pub fn emit_procedures(mut self, emit: bool) -> Self {
        self.emit_procedures = emit;
        self
    }

    #[must_use]
    pub fn export_chunk_size(mut self, rows: usize) -> Self {
        self.export_chunk_size = rows;
        self
    }

    #[must_use]
    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }
}

/// One page of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    /// Rows matching the filter, ignoring paging.
    pub total: u64,
}

/// Operation context attached to database errors.
#[derive(Debug, Clone, Copy)]
pub(super) struct Op<'a> {
    pub name: &'static str,
    pub type_key: &'a str,
}

impl<'a> Op<'a> {
    pub fn new(name: &'static str, type_key: &'a str) -> Self {
        Self { name, type_key }
    }

    pub fn err(&self, e: DbError) -> Error {
        Error::operation(self.name, self.type_key, e)
    }
}

/// A connection for the duration of one operation.
pub(super) enum Checkout {
    Pooled(PooledConnection),
    Dedicated(SharedConnection),
}

impl Checkout {
    pub fn shared(&self) -> &SharedConnection {
        match self {
            Checkout::Pooled(p) => p.connection(),
            Checkout::Dedicated(c) => c,
        }
    }
}

pub(super) async fn exec(
    conn: &mut dyn Connection,
    op: Op<'_>,
    statement: &Statement,
    params: &Params,
) -> Result<ExecResult> {
    conn.execute(statement, params).await.map_err(|e| op.err(e))
}

/// Begin a transaction unless the connection is already in one. Returns
/// whether the caller owns it.
pub(super) async fn begin_own(conn: &mut dyn Connection, op: Op<'_>) -> Result<bool> {
    if conn.in_transaction() {
        return Ok(false);
    }
    conn.begin(IsolationLevel::ReadCommitted)
        .await
        .map_err(|e| op.err(e))?;
    Ok(true)
}

/// Commit an owned transaction when `keep` accepts the result, roll it back
/// otherwise.
pub(super) async fn finish_own<T>(
    conn: &mut dyn Connection,
    own: bool,
    op: Op<'_>,
    result: Result<T>,
    keep: impl Fn(&T) -> bool,
) -> Result<T> {
    if !own {
        return result;
    }
    match result {
        Ok(value) if keep(&value) => {
            conn.commit().await.map_err(|e| op.err(e))?;
            Ok(value)
        }
        Ok(value) => {
            conn.rollback().await.map_err(|e| op.err(e))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = conn.rollback().await {
                warn!(operation = op.name, error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

struct Inner {
    options: ProviderOptions,
    info: ConnectionInfo,
    inspector: Arc<Inspector>,
    registry: Arc<TypeRegistry>,
    pool: Arc<ConnectionPool>,
    schemas: Arc<SchemaCache>,
    statements: Arc<StatementCache>,
    dedicated: Mutex<Option<SharedConnection>>,
}

/// Builder for [`DataProvider`].
pub struct DataProviderBuilder {
    options: ProviderOptions,
    inspector: Option<Arc<Inspector>>,
    registry: Option<TypeRegistry>,
    factory: Option<Arc<dyn ConnectionFactory>>,
    pool: Option<Arc<ConnectionPool>>,
    schemas: Option<Arc<SchemaCache>>,
    statements: Option<Arc<StatementCache>>,
}

impl DataProviderBuilder {
    #[must_use]
    pub fn inspector(mut self, inspector: Arc<Inspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Derived-type registry. Without one, every type the inspector knows is
    /// registered with an empty-record factory.
    #[must_use]
    pub fn registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Connection factory for a private pool.
    #[must_use]
    pub fn factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// A pool shared with other providers.
    #[must_use]
    pub fn pool(mut self, pool: Arc<ConnectionPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    #[must_use]
    pub fn schema_cache(mut self, cache: Arc<SchemaCache>) -> Self {
        self.schemas = Some(cache);
        self
    }

    #[must_use]
    pub fn statement_cache(mut self, cache: Arc<StatementCache>) -> Self {
        self.statements = Some(cache);
        self
    }

    pub fn build(self) -> Result<DataProvider> {
        let info = ConnectionInfo::parse(&self.options.connection_string)?;
        let inspector = self
            .inspector
            .ok_or_else(|| Error::Internal("data provider needs an inspector".into()))?;
        let pool = match (self.pool, self.factory) {
            (Some(pool), _) => pool,
            (None, Some(factory)) => ConnectionPool::new(factory, self.options.statement_timeout),
            (None, None) => {
                return Err(Error::Internal(
                    "data provider needs a connection pool or factory".into(),
                ))
            }
        };
        let registry = match self.registry {
            Some(registry) => registry,
            None => {
                let mut registry = TypeRegistry::new();
                for key in inspector.type_keys() {
                    let model = inspector.describe(&key)?;
                    registry.register_model(&model);
                }
                registry
            }
        };

        Ok(DataProvider {
            inner: Arc::new(Inner {
                options: self.options,
                info,
                inspector,
                registry: Arc::new(registry),
                pool,
                schemas: self.schemas.unwrap_or_default(),
                statements: self.statements.unwrap_or_default(),
                dedicated: Mutex::new(None),
            }),
        })
    }
}

/// Persistence operations for the model types of one dataset connection.
#[derive(Clone)]
pub struct DataProvider {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProvider")
            .field("data_source", &self.inner.info.data_source)
            .field("database", &self.inner.info.database)
            .field("schema", &self.inner.options.schema)
            .field("in_scope", &self.in_scope())
            .finish()
    }
}

impl DataProvider {
    pub fn builder(options: ProviderOptions) -> DataProviderBuilder {
        DataProviderBuilder {
            options,
            inspector: None,
            registry: None,
            factory: None,
            pool: None,
            schemas: None,
            statements: None,
        }
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.inner.options
    }

    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.inner.info
    }

    pub fn inspector(&self) -> &Inspector {
        &self.inner.inspector
    }

    pub fn statement_cache(&self) -> &StatementCache {
        &self.inner.statements
    }

    /// Desired tables of a type, base table first.
    pub fn tables(&self, type_key: &str) -> Result<Vec<TableSchema>> {
        let model = self.model(type_key)?;
        Ok(self.schema_set(&model)?.tables.clone())
    }

    // ---- scope plumbing -------------------------------------------------

    pub(super) fn pool(&self) -> &Arc<ConnectionPool> {
        &self.inner.pool
    }

    pub(super) fn in_scope(&self) -> bool {
        self.inner.dedicated.lock().is_some()
    }

    pub(super) fn set_dedicated(&self, connection: Option<SharedConnection>) {
        *self.inner.dedicated.lock() = connection;
    }

    pub(super) async fn checkout(&self, op: Op<'_>) -> Result<Checkout> {
        let dedicated = self.inner.dedicated.lock().clone();
        if let Some(connection) = dedicated {
            return Ok(Checkout::Dedicated(connection));
        }
        self.inner
            .pool
            .acquire(&self.inner.options.connection_string)
            .await
            .map(Checkout::Pooled)
            .map_err(|e| op.err(e))
    }

    fn site(&self) -> Option<&str> {
        self.inner.options.site.as_deref()
    }

    // ---- schemas and statements -----------------------------------------

    pub(super) fn model(&self, type_key: &str) -> Result<Arc<ModelType>> {
        Ok(self.inner.inspector.describe(type_key)?)
    }

    pub(super) fn schema_set(&self, model: &ModelType) -> Result<Arc<SchemaSet>> {
        let options = &self.inner.options;
        let languages = options.languages.iter().collect::<Vec<_>>().join(",");
        self.inner
            .statements
            .schema_set(&model.key, &options.schema, &languages, || {
                let builder =
                    SchemaBuilder::new(&self.inner.inspector, &options.languages, &options.schema);
                let tables = builder.build_all(model)?;
                let shape = match tables.as_slice() {
                    [base, derived] => TableSchema::merged_view(base, derived),
                    [table] => table.clone(),
                    _ => return Err(ConfigError::UnknownType(model.key.clone()).into()),
                };
                SchemaSet::new(tables, shape)
            })
    }

    fn statement(
        &self,
        set: &SchemaSet,
        table: &TableSchema,
        kind: StatementKind,
    ) -> Result<Arc<Statement>> {
        self.inner
            .statements
            .statement(set, &table.name, kind, || build_statement(set, table, kind))
    }

    // ---- install / uninstall --------------------------------------------

    /// Create or migrate every table of a type and, when enabled, its stored
    /// procedures. Returns the statements executed; installing an up-to-date
    /// type executes nothing.
    pub async fn install(&self, type_key: &str) -> Result<MigrationPlan> {
        let model = self.model(type_key)?;
        let set = self.schema_set(&model)?;
        let op = Op::new("Install", &model.key);
        let checkout = self.checkout(op).await?;
        let mut guard = checkout.shared().lock().await;
        let conn: &mut dyn Connection = guard.as_mut();

        let tables: Vec<&TableSchema> = set.tables.iter().flat_map(|t| t.walk()).collect();
        let mut live = Vec::with_capacity(tables.len());
        for table in &tables {
            let found = self
                .inner
                .schemas
                .get_table(&self.inner.info, conn, &table.schema, &table.name)
                .await
                .map_err(|e| op.err(e))?;
            let has_rows = match found {
                Some(_) => {
                    let probe = Statement::Query(probe_rows(&table.schema, &table.name));
                    !exec(conn, op, &probe, &Params::new()).await?.rows.is_empty()
                }
                None => false,
            };
            live.push((found, has_rows));
        }
        let states: Vec<TableState<'_>> = tables
            .iter()
            .zip(&live)
            .map(|(table, (found, has_rows))| TableState::new(table, found.as_deref(), *has_rows))
            .collect();

        let mut plan = MigrationPlan::install(&states)?;
        for statement in &plan.statements {
            exec(conn, op, statement, &Params::new()).await?;
        }
        if !plan.is_empty() {
            self.inner.schemas.invalidate(&self.inner.info);
        }

        if self.inner.options.emit_procedures {
            for table in set.tables.iter().filter(|t| t.derived.is_none()) {
                if !procedure::supports_procedures(table) {
                    debug!(table = %table.name, "nested subtables, no procedures");
                    continue;
                }
                let touched = table
                    .walk()
                    .iter()
                    .any(|t| plan.touched.iter().any(|n| n.eq_ignore_ascii_case(&t.name)));
                let name = procedure_name(table, ProcedureKind::Get);
                let present = object_exists(conn, &table.schema, &name, ObjectKind::Procedure)
                    .await
                    .map_err(|e| op.err(e))?;
                if touched || !present {
                    for ddl in procedure::install_statements(table)? {
                        let statement = Statement::Ddl(ddl);
                        exec(conn, op, &statement, &Params::new()).await?;
                        plan.statements.push(statement);
                    }
                    debug!(table = %table.name, "installed procedures");
                }
            }
        }

        self.inner.statements.clear();
        info!(type_key = %model.key, statements = plan.len(), "install finished");
        Ok(plan)
    }

    /// Drop every table of a type. Uninstalling a base type also drops the
    /// tables of the types derived from it.
    pub async fn uninstall(&self, type_key: &str) -> Result<MigrationPlan> {
        let model = self.model(type_key)?;
        let set = self.schema_set(&model)?;
        let op = Op::new("Uninstall", &model.key);

        let mut sets = vec![set.clone()];
        if model.inheritance == Inheritance::Base {
            for derived in self.inner.inspector.derived_types(&model.key)? {
                sets.push(self.schema_set(&derived)?);
            }
        }
        let owned: Vec<&TableSchema> = sets.iter().filter_map(|s| s.own_table()).collect();
        let tables: Vec<&TableSchema> = owned.iter().flat_map(|t| t.walk()).collect();

        let mut plan = MigrationPlan::default();
        for table in owned.iter().filter(|t| t.derived.is_none()) {
            plan.statements
                .extend(procedure::drop_statements(table).into_iter().map(Statement::Ddl));
        }
        plan.statements
            .extend(MigrationPlan::uninstall(&tables).statements);

        let checkout = self.checkout(op).await?;
        let mut guard = checkout.shared().lock().await;
        let conn: &mut dyn Connection = guard.as_mut();
        for statement in &plan.statements {
            exec(conn, op, statement, &Params::new()).await?;
        }

        self.inner.schemas.invalidate(&self.inner.info);
        self.inner.statements.clear();
        info!(type_key = %model.key, tables = tables.len(), "uninstall finished");
        Ok(plan)
    }

    // ---- add ------------------------------------------------------------

    /// Insert a record with its subtable rows. The assigned identity, if
    /// any, is written back into the record.
    pub async fn add(&self, record: &mut Record) -> Result<AddOutcome> {
        let model = self.model(&record.type_key)?;
        let set = self.schema_set(&model)?;
        check_fields(&set.shape, record)?;
        let op = Op::new("Add", &model.key);
        let checkout = self.checkout(op).await?;
        let mut guard = checkout.shared().lock().await;
        let conn: &mut dyn Connection = guard.as_mut();

        let own = begin_own(conn, op).await?;
        let result = self.add_on(conn, op, &model, &set, record).await;
        finish_own(conn, own, op, result, AddOutcome::is_added).await
    }

    pub(super) async fn add_on(
        &self,
        conn: &mut dyn Connection,
        op: Op<'_>,
        model: &ModelType,
        set: &SchemaSet,
        record: &mut Record,
    ) -> Result<AddOutcome> {
        let (write, derived) = split(set)?;
        let site = self.site();

        let mut synthetic = Synthetic::site(site);
        if let Some(d) = derived {
            synthetic.descriptor = Some((d.name.as_str(), model.name.as_str(), model.module.as_str()));
        }
        let mut params = Params::new();
        crud::bind_row(write, record, &synthetic, &mut params)?;
        let insert = self.statement(set, write, StatementKind::Insert)?;
        let result = match conn.execute(&insert, &params).await {
            Ok(result) => result,
            Err(e) if e.is_unique_violation() => {
                debug!(type_key = %model.key, "add: key already exists");
                return Ok(AddOutcome::AlreadyExists);
            }
            Err(e) => return Err(op.err(e)),
        };

        let identity = match write.identity() {
            Some(column) => {
                let id = result
                    .first()
                    .and_then(|row| row.value(&column.name).as_i32())
                    .ok_or_else(|| {
                        Error::Internal(format!("{} returned no identity for {}", op.name, model.key))
                    })?;
                if let Some(path) = column.path() {
                    record.set_at(path, Field::Value(Value::Int32(id)));
                }
                Some(id)
            }
            None => None,
        };

        if let Some(d) = derived {
            let mut params = Params::new();
            crud::bind_row(d, record, &Synthetic::site(site), &mut params)?;
            let insert = self.statement(set, d, StatementKind::Insert)?;
            exec(conn, op, &insert, &params).await?;
        }

        for table in &set.tables {
            for sub in &table.subtables {
                let link = link_value(table, sub.table.link.as_ref(), record)?;
                self.insert_children(conn, op, set, &sub.table, link, record.collection(&sub.property))
                    .await?;
            }
        }
        Ok(AddOutcome::Added { identity })
    }

    fn insert_children<'a>(
        &'a self,
        conn: &'a mut dyn Connection,
        op: Op<'a>,
        set: &'a SchemaSet,
        sub: &'a TableSchema,
        parent: Value,
        items: &'a [Record],
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if items.is_empty() {
                return Ok(());
            }
            let insert = self.statement(set, sub, StatementKind::Insert)?;
            for item in items {
                let mut params = Params::new();
                crud::bind_row(sub, item, &Synthetic::parent(parent.clone()), &mut params)?;
                let result = exec(conn, op, &insert, &params).await?;
                if sub.subtables.is_empty() {
                    continue;
                }
                let row_id = match (sub.link_target(), result.first()) {
                    (Some(target), Some(row)) => row.value(&target.name),
                    _ => Value::Null,
                };
                for nested in &sub.subtables {
                    self.insert_children(
                        &mut *conn,
                        op,
                        set,
                        &nested.table,
                        row_id.clone(),
                        item.collection(&nested.property),
                    )
                    .await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    // ---- update ---------------------------------------------------------

    /// Update a record addressed by its own key.
    pub async fn update(&self, record: &Record) -> Result<UpdateOutcome> {
        self.update_with("Update", record, record, KeyKind::Key).await
    }

    /// Update a record whose key may have changed: `original` carries the key
    /// as read.
    pub async fn update_key(&self, original: &Record, record: &Record) -> Result<UpdateOutcome> {
        self.update_with("Update", original, record, KeyKind::Key).await
    }

    /// Update a record addressed by its identity; key properties may change.
    pub async fn update_by_identity(&self, record: &Record) -> Result<UpdateOutcome> {
        self.update_with("UpdateByIdentity", record, record, KeyKind::Identity)
            .await
    }

    async fn update_with(
        &self,
        name: &'static str,
        original: &Record,
        record: &Record,
        kind: KeyKind,
    ) -> Result<UpdateOutcome> {
        let model = self.model(&record.type_key)?;
        let set = self.schema_set(&model)?;
        check_fields(&set.shape, record)?;
        let op = Op::new(name, &model.key);
        let checkout = self.checkout(op).await?;
        let mut guard = checkout.shared().lock().await;
        let conn: &mut dyn Connection = guard.as_mut();

        let own = begin_own(conn, op).await?;
        let result = self.update_on(conn, op, &set, original, record, kind).await;
        finish_own(conn, own, op, result, |o| *o == UpdateOutcome::Updated).await
    }

    pub(super) async fn update_on(
        &self,
        conn: &mut dyn Connection,
        op: Op<'_>,
        set: &SchemaSet,
        original: &Record,
        record: &Record,
        kind: KeyKind,
    ) -> Result<UpdateOutcome> {
        let (write, derived) = split(set)?;
        let site = self.site();

        let mut params = Params::new();
        crud::bind_row(write, record, &Synthetic::site(site), &mut params)?;
        crud::bind_address(write, kind, original, site, ORIGINAL_PREFIX, &mut params)?;
        let update = self.statement(set, write, StatementKind::Update(kind))?;
        let result = match conn.execute(&update, &params).await {
            Ok(result) => result,
            Err(e) if e.is_unique_violation() => {
                debug!(type_key = op.type_key, "update: new key already exists");
                return Ok(UpdateOutcome::NewKeyExists);
            }
            Err(e) => return Err(op.err(e)),
        };
        match result.rows_affected {
            0 => {
                debug!(type_key = op.type_key, "update: no row matched the original key");
                return Ok(UpdateOutcome::RecordDeleted);
            }
            1 => {}
            n => return Err(Error::too_many_rows(op.name, op.type_key, n)),
        }

        // Identity addressed rows may arrive without one; take it from OUTPUT.
        let mut current = record.clone();
        if let (Some(identity), Some(row)) = (write.identity(), result.first()) {
            if let Some(path) = identity.path() {
                current.set_at(path, Field::Value(row.value(&identity.name)));
            }
        }

        if let Some(d) = derived {
            if crud::update_derived(d).is_some() {
                let mut params = Params::new();
                crud::bind_row(d, &current, &Synthetic::site(site), &mut params)?;
                let update = self.statement(set, d, StatementKind::UpdateDerived)?;
                exec(conn, op, &update, &params).await?;
            }
        }

        for table in &set.tables {
            for sub in &table.subtables {
                let link = link_value(table, sub.table.link.as_ref(), &current)?;
                let mut params = Params::new();
                params.bind(param_name(PARENT_COLUMN), link.clone());
                let delete = self.statement(set, &sub.table, StatementKind::DeleteChildren)?;
                exec(conn, op, &delete, &params).await?;
                self.insert_children(conn, op, set, &sub.table, link, current.collection(&sub.property))
                    .await?;
            }
        }
        Ok(UpdateOutcome::Updated)
    }

    // ---- remove ---------------------------------------------------------

    /// Delete a record by key. `false` when no row matched or another row
    /// still references it.
    pub async fn remove(&self, key: &Record) -> Result<bool> {
        self.remove_with("Remove", &key.type_key, key, KeyKind::Key).await
    }

    pub async fn remove_by_identity(&self, type_key: &str, identity: i32) -> Result<bool> {
        let probe = self.identity_probe(type_key, identity)?;
        self.remove_with("RemoveByIdentity", type_key, &probe, KeyKind::Identity)
            .await
    }

    async fn remove_with(
        &self,
        name: &'static str,
        type_key: &str,
        probe: &Record,
        kind: KeyKind,
    ) -> Result<bool> {
        let model = self.model(type_key)?;
        let set = self.schema_set(&model)?;
        let op = Op::new(name, &model.key);
        let (write, _) = split(&set)?;

        let mut params = Params::new();
        crud::bind_address(write, kind, probe, self.site(), "", &mut params)?;
        let delete = self.statement(&set, write, StatementKind::Delete(kind))?;

        let checkout = self.checkout(op).await?;
        let mut guard = checkout.shared().lock().await;
        let conn: &mut dyn Connection = guard.as_mut();

        let own = begin_own(conn, op).await?;
        let result = match conn.execute(&delete, &params).await {
            Ok(r) => match r.rows_affected {
                0 => Ok(false),
                1 => Ok(true),
                n => Err(Error::too_many_rows(op.name, op.type_key, n)),
            },
            Err(e) if e.is_foreign_key_violation() => {
                debug!(type_key = %model.key, "remove: row is still referenced");
                Ok(false)
            }
            Err(e) => Err(op.err(e)),
        };
        finish_own(conn, own, op, result, |removed| *removed).await
    }

    // ---- get ------------------------------------------------------------

    /// Read one record by key. Rows of a base type that belong to a derived
    /// type come back as records of that derived type.
    pub async fn get(&self, key: &Record) -> Result<Option<Record>> {
        self.get_with("Get", &key.type_key, key, KeyKind::Key).await
    }

    pub async fn get_by_identity(&self, type_key: &str, identity: i32) -> Result<Option<Record>> {
        let probe = self.identity_probe(type_key, identity)?;
        self.get_with("GetByIdentity", type_key, &probe, KeyKind::Identity)
            .await
    }

    fn identity_probe(&self, type_key: &str, identity: i32) -> Result<Record> {
        let model = self.model(type_key)?;
        // A derived type shares the identity of its base.
        let owner = match model.base_key() {
            Some(base) => self.model(base)?,
            None => model.clone(),
        };
        let property = owner.identity().ok_or_else(|| {
            ConfigError::invalid_identity(&model.key, "", "type has no identity property")
        })?;
        Ok(Record::new(&model.key).with(&property.name, identity))
    }

    async fn get_with(
        &self,
        name: &'static str,
        type_key: &str,
        probe: &Record,
        kind: KeyKind,
    ) -> Result<Option<Record>> {
        let model = self.model(type_key)?;
        let set = self.schema_set(&model)?;
        let op = Op::new(name, &model.key);
        let checkout = self.checkout(op).await?;
        let mut guard = checkout.shared().lock().await;
        let conn: &mut dyn Connection = guard.as_mut();

        if model.inheritance == Inheritance::Base {
            return self.get_dynamic(conn, op, &set, probe, kind).await;
        }

        let (write, derived) = split(&set)?;
        let mut params = Params::new();
        crud::bind_address(write, kind, probe, self.site(), "", &mut params)?;
        let statement = match derived {
            Some(d) => self.statement(&set, d, StatementKind::JoinedGet(kind))?,
            None => self.statement(&set, write, StatementKind::Get(kind))?,
        };
        self.read_one(conn, op, &set, &statement, &params).await
    }

    /// Read through a base table, switching to the derived type its
    /// descriptor names.
    async fn get_dynamic(
        &self,
        conn: &mut dyn Connection,
        op: Op<'_>,
        set: &SchemaSet,
        probe: &Record,
        kind: KeyKind,
    ) -> Result<Option<Record>> {
        let (base, _) = split(set)?;
        let mut params = Params::new();
        crud::bind_address(base, kind, probe, self.site(), "", &mut params)?;
        let lookup = self.statement(set, base, StatementKind::DescriptorLookup(kind))?;
        let rows = exec(conn, op, &lookup, &params).await?.rows;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let Some(descriptor) = decode_descriptor(row) else {
            let get = self.statement(set, base, StatementKind::Get(kind))?;
            return self.read_one(conn, op, set, &get, &params).await;
        };

        let registered = self
            .inner
            .registry
            .resolve(&descriptor.module, &descriptor.type_name)?
            .clone();
        let model = self.model(&registered.key)?;
        let derived_set = self.schema_set(&model)?;
        let (_, derived) = split(&derived_set)?;
        let derived = derived.ok_or_else(|| {
            ConfigError::InvalidDescriptor(format!("{} is not a derived type", model.key))
        })?;
        if !derived.name.eq_ignore_ascii_case(&descriptor.table) {
            return Err(ConfigError::InvalidDescriptor(format!(
                "row names table {} but {} is stored in {}",
                descriptor.table, model.key, derived.name
            ))
            .into());
        }
        debug!(base = op.type_key, derived = %model.key, "resolved derived row");

        let get = self.statement(&derived_set, derived, StatementKind::JoinedGet(kind))?;
        let found = self.read_one(conn, op, &derived_set, &get, &params).await?;
        Ok(found.map(|hydrated| {
            let mut record = (registered.factory)();
            record.fields.extend(hydrated.fields);
            record
        }))
    }

    async fn read_one(
        &self,
        conn: &mut dyn Connection,
        op: Op<'_>,
        set: &SchemaSet,
        statement: &Statement,
        params: &Params,
    ) -> Result<Option<Record>> {
        let rows = exec(conn, op, statement, params).await?.rows;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let mut record = hydrate_row(&set.shape, &row)?;
        self.load_children(
            conn,
            op,
            set,
            &set.shape,
            std::slice::from_mut(&mut record),
            std::slice::from_ref(&row),
        )
        .await?;
        Ok(Some(record))
    }

    /// Fill the collections of `records` from their subtables, one batch of
    /// parents at a time.
    fn load_children<'a>(
        &'a self,
        conn: &'a mut dyn Connection,
        op: Op<'a>,
        set: &'a SchemaSet,
        table: &'a TableSchema,
        records: &'a mut [Record],
        rows: &'a [Row],
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            for sub in &table.subtables {
                let Some(link) = &sub.table.link else {
                    continue;
                };
                let links: Vec<Value> = rows.iter().map(|r| r.value(&link.parent_column)).collect();

                let mut child_rows = Vec::new();
                for chunk in links.chunks(PARENT_BATCH) {
                    let parents: Vec<Value> = chunk.iter().filter(|v| !v.is_null()).cloned().collect();
                    if parents.is_empty() {
                        continue;
                    }
                    let select =
                        self.statement(set, &sub.table, StatementKind::SelectChildren(parents.len()))?;
                    let mut params = Params::new();
                    crud::bind_parents(&parents, &mut params);
                    child_rows.extend(exec(conn, op, &select, &params).await?.rows);
                }

                let mut items = child_rows
                    .iter()
                    .map(|r| hydrate_row(&sub.table, r))
                    .collect::<Result<Vec<_>>>()?;
                self.load_children(&mut *conn, op, set, &sub.table, &mut items, &child_rows)
                    .await?;
                let children = child_rows
                    .iter()
                    .map(|r| r.value(PARENT_COLUMN))
                    .zip(items)
                    .collect();
                assign_children(records, &links, &sub.property, children);
            }
            Ok(())
        }
        .boxed()
    }

    // ---- query ----------------------------------------------------------

    /// Filtered, sorted and paged read of a type, with the total match count.
    pub async fn query(&self, type_key: &str, spec: &QuerySpec) -> Result<Page> {
        let model = self.model(type_key)?;
        let set = self.schema_set(&model)?;
        let op = Op::new("Query", &model.key);

        let joined_sets = spec
            .joins
            .iter()
            .map(|j| self.model(&j.type_key).and_then(|m| self.schema_set(&m)))
            .collect::<Result<Vec<_>>>()?;
        let joined = joined_sets
            .iter()
            .map(|s| own_table(s))
            .collect::<Result<Vec<_>>>()?;
        let primary = own_table(&set)?;
        let plan = plan_select(primary, set.base_table(), &joined, spec, self.site())?;

        let checkout = self.checkout(op).await?;
        let mut guard = checkout.shared().lock().await;
        let conn: &mut dyn Connection = guard.as_mut();
        self.query_on(conn, op, &set, &plan).await
    }

    pub(super) async fn query_on(
        &self,
        conn: &mut dyn Connection,
        op: Op<'_>,
        set: &SchemaSet,
        plan: &SelectPlan,
    ) -> Result<Page> {
        let count = Statement::Query(plan.count.clone());
        let total = exec(conn, op, &count, &plan.params)
            .await?
            .first()
            .and_then(|r| r.value(TOTAL_COLUMN).as_i64())
            .map_or(0, |n| u64::try_from(n).unwrap_or(0));

        if plan.empty_page {
            return Ok(Page {
                records: Vec::new(),
                total,
            });
        }
        let page = Statement::Query(plan.page.clone());
        let rows = exec(conn, op, &page, &plan.params).await?.rows;
        let mut records = rows
            .iter()
            .map(|r| hydrate_row(&set.shape, r))
            .collect::<Result<Vec<_>>>()?;
        self.load_children(conn, op, set, &set.shape, &mut records, &rows)
            .await?;
        Ok(Page { records, total })
    }
}

fn own_table(set: &SchemaSet) -> Result<&TableSchema> {
    set.own_table()
        .ok_or_else(|| Error::Internal("schema set without tables".into()))
}

/// The table a write addresses (base for a derived type) and the derived
/// table, if any.
fn split(set: &SchemaSet) -> Result<(&TableSchema, Option<&TableSchema>)> {
    match set.base_table() {
        Some(base) => Ok((base, set.own_table())),
        None => Ok((own_table(set)?, None)),
    }
}

/// Value a subtable row carries in `__Parent` for this record.
fn link_value(
    table: &TableSchema,
    link: Option<&SubtableLink>,
    record: &Record,
) -> Result<Value> {
    let column = link
        .and_then(|l| table.column(&l.parent_column))
        .ok_or_else(|| Error::Internal(format!("{} has no subtable link column", table.name)))?;
    column_value(record, column)
}

fn build_statement(set: &SchemaSet, table: &TableSchema, kind: StatementKind) -> Result<Statement> {
    Ok(match kind {
        StatementKind::Get(k) => crud::get(table, k)?.into(),
        StatementKind::Insert => crud::insert(table).into(),
        StatementKind::Update(k) => {
            let mut update = crud::update(table, k)?;
            let has_children = set.tables.iter().any(|t| !t.subtables.is_empty());
            if let (true, Some(identity)) = (has_children, table.identity()) {
                update = update.output([identity.name.clone()]);
            }
            update.into()
        }
        StatementKind::Delete(k) => crud::delete(table, k)?.into(),
        StatementKind::UpdateDerived => crud::update_derived(table)
            .ok_or_else(|| Error::Internal(format!("{} has no columns of its own", table.name)))?
            .into(),
        StatementKind::DescriptorLookup(k) => derived::descriptor_lookup(table, k)?.into(),
        StatementKind::JoinedGet(k) => {
            let base = set
                .base_table()
                .ok_or_else(|| Error::Internal(format!("{} is not a derived table", table.name)))?;
            derived::joined_get(base, table, k)?.into()
        }
        StatementKind::DeleteChildren => crud::delete_children(table).into(),
        StatementKind::SelectChildren(n) => crud::select_children(table, n).into(),
    })
}
