//! The batch storage engine.
//!
//! [`StorageEngine::process`] runs an ordered list of instructions inside one
//! transaction. Steps run strictly in order; a create may fill foreign-key
//! fields from rows created earlier in the same batch (see [`Ledger`]). Any
//! failure rolls the whole batch back.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{
    Action, BackendError, BatchConnection, BatchPool, Conjunction, Delete, Entity, EntityFactory,
    FactoryRegistry, Filter, Insert, Instruction, KeyPolicy, Ledger, LedgerAction, LedgerRecord,
    Payload, Predicate, Select, StorageError, Update, Variant, assignments_token, fields_token, filter_token,
    insertion_rows,
};

/// Engine behaviour that is not part of an instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Handling of filter keys the entity type does not declare.
    pub filter_keys: KeyPolicy,
    /// Operator joining filter clauses.
    pub conjunction: Conjunction,
}

/// Result of one instruction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "result", rename_all = "lowercase")]
pub enum StepOutcome {
    Created(Vec<Entity>),
    Updated(Vec<Entity>),
    /// Number of rows removed.
    Deleted(u64),
    One(Entity),
    Many(Vec<Entity>),
    /// The action was not recognized.
    Skipped,
}

impl StepOutcome {
    /// Rows written, removed or read by the step.
    pub fn rows(&self) -> u64 {
        match self {
            Self::Created(entities) | Self::Updated(entities) | Self::Many(entities) => {
                entities.len() as u64
            }
            Self::Deleted(count) => *count,
            Self::One(_) => 1,
            Self::Skipped => 0,
        }
    }
}

/// What a committed batch hands back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    /// Created and updated rows, most recent first.
    pub ledger: Vec<LedgerRecord>,
    /// One outcome per instruction, in instruction order.
    pub steps: Vec<StepOutcome>,
}

impl BatchResult {
    /// Ledger records of one type, most recent first.
    pub fn records_for<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = &'a LedgerRecord> {
        self.ledger.iter().filter(move |r| r.type_name == type_name)
    }

    /// Ledger records grouped by type name.
    pub fn by_type(&self) -> BTreeMap<&str, Vec<&LedgerRecord>> {
        let mut grouped: BTreeMap<&str, Vec<&LedgerRecord>> = BTreeMap::new();
        for record in &self.ledger {
            grouped.entry(record.type_name.as_str()).or_default().push(record);
        }
        grouped
    }
}

/// Runs instruction batches against a pool.
pub struct StorageEngine<P> {
    registry: Arc<FactoryRegistry>,
    pool: Option<P>,
    config: EngineConfig,
}

impl<P: BatchPool> StorageEngine<P> {
    pub fn new(registry: Arc<FactoryRegistry>, pool: P) -> Self {
        Self {
            registry,
            pool: Some(pool),
            config: EngineConfig::default(),
        }
    }

    /// An engine without a backend; every batch fails with `NoConnection`.
    pub fn detached(registry: Arc<FactoryRegistry>) -> Self {
        Self {
            registry,
            pool: None,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &FactoryRegistry {
        &self.registry
    }

    pub fn pool(&self) -> Option<&P> {
        self.pool.as_ref()
    }

    fn connected_pool(&self) -> Result<&P, StorageError> {
        self.pool.as_ref().ok_or(StorageError::NoConnection)
    }

    /// Execute `instructions` in order inside a single transaction.
    ///
    /// Commits when every step succeeds; otherwise rolls back and returns the
    /// first error.
    #[instrument(skip_all, fields(steps = instructions.len()))]
    pub async fn process(&self, instructions: &[Instruction]) -> Result<BatchResult, StorageError> {
        let pool = self.connected_pool()?;
        let mut conn = pool.begin().await?;

        let mut batch = Batch {
            registry: &self.registry,
            config: self.config,
            ledger: Ledger::new(),
            steps: Vec::with_capacity(instructions.len()),
        };

        match batch.run(&mut conn, instructions).await {
            Ok(()) => {
                conn.commit().await?;
                debug!(records = batch.ledger.len(), "Batch committed");
                Ok(BatchResult {
                    ledger: batch.ledger.into_records(),
                    steps: batch.steps,
                })
            }
            Err(e) => {
                if let Err(rollback_err) = conn.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                debug!(error = %e, "Batch rolled back");
                Err(e)
            }
        }
    }

    /// Whether any row of `type_name` matches `filter`, outside any batch.
    #[instrument(skip(self, filter))]
    pub async fn exists(&self, type_name: &str, filter: Option<&Filter>) -> Result<bool, StorageError> {
        let pool = self.connected_pool()?;
        let factory = self.registry.lookup(type_name)?;
        let predicate = filter_token(
            factory.descriptor_set(Variant::Root),
            filter,
            self.config.filter_keys,
            self.config.conjunction,
        )?;
        let select = Select::new(factory.table(), predicate).limit(1);
        Ok(pool.exists(select).await?)
    }

    /// Draw the next value of `<table>_<column>_seq`, to know an id before
    /// inserting the row.
    #[instrument(skip(self))]
    pub async fn reserve_id(&self, type_name: &str, column: &str) -> Result<i64, StorageError> {
        let pool = self.connected_pool()?;
        let factory = self.registry.lookup(type_name)?;
        let sequence = format!("{}_{}_seq", factory.table(), column);
        Ok(pool.next_sequence_value(&sequence).await?)
    }
}

/// State owned by one running batch.
struct Batch<'a> {
    registry: &'a FactoryRegistry,
    config: EngineConfig,
    ledger: Ledger,
    steps: Vec<StepOutcome>,
}

/// Wraps a backend failure of `step` into `FailedQuery`.
fn failed_query(step: usize, instruction: &Instruction) -> impl FnOnce(BackendError) -> StorageError + '_ {
    move |source| StorageError::FailedQuery {
        step,
        instruction: instruction.label(),
        source,
    }
}

impl Batch<'_> {
    async fn run<C: BatchConnection>(
        &mut self,
        conn: &mut C,
        instructions: &[Instruction],
    ) -> Result<(), StorageError> {
        for (step, instruction) in instructions.iter().enumerate() {
            let outcome = self.execute(conn, step, instruction).await?;
            self.steps.push(outcome);
        }
        Ok(())
    }

    async fn execute<C: BatchConnection>(
        &mut self,
        conn: &mut C,
        step: usize,
        instruction: &Instruction,
    ) -> Result<StepOutcome, StorageError> {
        if let Action::Unknown(action) = &instruction.action {
            warn!(step, action = %action, type_name = %instruction.type_name, "Skipping unknown action");
            return Ok(StepOutcome::Skipped);
        }

        let factory = self.registry.lookup(&instruction.type_name)?;

        let outcome = match instruction.action {
            Action::Create => StepOutcome::Created(self.create(conn, step, &factory, instruction).await?),
            Action::Update => StepOutcome::Updated(self.update(conn, step, &factory, instruction).await?),
            Action::Delete => {
                let delete = Delete {
                    table: factory.table().to_string(),
                    predicate: self.predicate(&factory, instruction.filter.as_ref())?,
                };
                let removed = conn
                    .delete(delete)
                    .await
                    .map_err(failed_query(step, instruction))?;
                StepOutcome::Deleted(removed)
            }
            Action::One => {
                let select = Select::new(
                    factory.table(),
                    self.predicate(&factory, instruction.filter.as_ref())?,
                )
                .limit(2);
                let rows = conn
                    .select(select)
                    .await
                    .map_err(failed_query(step, instruction))?;
                match rows.as_slice() {
                    [row] => StepOutcome::One(factory.create_entity(row)),
                    [] => {
                        return Err(StorageError::NotFound {
                            type_name: instruction.type_name.clone(),
                        });
                    }
                    _ => {
                        return Err(StorageError::Integrity {
                            type_name: instruction.type_name.clone(),
                            matched: rows.len(),
                        });
                    }
                }
            }
            Action::Many => {
                let select = Select::new(
                    factory.table(),
                    self.predicate(&factory, instruction.filter.as_ref())?,
                );
                let rows = conn
                    .select(select)
                    .await
                    .map_err(failed_query(step, instruction))?;
                StepOutcome::Many(factory.create_entities(&rows))
            }
            Action::Unknown(_) => StepOutcome::Skipped,
        };

        debug!(step, instruction = %instruction.label(), rows = outcome.rows(), "Step executed");
        Ok(outcome)
    }

    fn predicate(
        &self,
        factory: &EntityFactory,
        filter: Option<&Filter>,
    ) -> Result<Predicate, StorageError> {
        filter_token(
            factory.descriptor_set(Variant::Root),
            filter,
            self.config.filter_keys,
            self.config.conjunction,
        )
    }

    /// Insert the payload rows, filling missing foreign keys from the ledger.
    async fn create<C: BatchConnection>(
        &mut self,
        conn: &mut C,
        step: usize,
        factory: &EntityFactory,
        instruction: &Instruction,
    ) -> Result<Vec<Entity>, StorageError> {
        let payloads = instruction
            .payload
            .as_ref()
            .map(Payload::rows)
            .unwrap_or_default();
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let set = factory.descriptor_set(Variant::Create);
        if set.is_empty() {
            return Err(StorageError::InvalidInstruction(format!(
                "{} has no creatable fields",
                factory.type_name()
            )));
        }

        let rows = insertion_rows(set, &payloads, |fk| self.ledger.resolve(fk));
        let insert = Insert {
            table: factory.table().to_string(),
            columns: fields_token(set),
            rows,
        };

        let stored = conn
            .insert(insert)
            .await
            .map_err(failed_query(step, instruction))?;
        let entities = factory.create_entities(&stored);
        for entity in &entities {
            self.ledger.record(LedgerAction::Create, entity.clone());
        }
        Ok(entities)
    }

    /// Apply the payload to every row matching the filter.
    async fn update<C: BatchConnection>(
        &mut self,
        conn: &mut C,
        step: usize,
        factory: &EntityFactory,
        instruction: &Instruction,
    ) -> Result<Vec<Entity>, StorageError> {
        let fields = match &instruction.payload {
            Some(Payload::One(fields)) => fields,
            Some(Payload::Many(rows)) if rows.len() == 1 => &rows[0],
            _ => {
                return Err(StorageError::InvalidInstruction(format!(
                    "{} needs exactly one payload object",
                    instruction.label()
                )));
            }
        };

        let assignments = assignments_token(factory.descriptor_set(Variant::Update), fields);
        if assignments.is_empty() {
            return Err(StorageError::EmptyUpdate {
                type_name: factory.type_name().to_string(),
            });
        }

        let update = Update {
            table: factory.table().to_string(),
            assignments,
            predicate: self.predicate(factory, instruction.filter.as_ref())?,
        };

        let stored = conn
            .update(update)
            .await
            .map_err(failed_query(step, instruction))?;
        let entities = factory.create_entities(&stored);
        for entity in &entities {
            self.ledger.record(LedgerAction::Update, entity.clone());
        }
        Ok(entities)
    }
}
