// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The experiment lifecycle registry.
//!
//! Orchestration-facing API over the record store for the
//! Experiment → WorkflowNode → Task → Job hierarchy, its statuses, and
//! error diagnostics.
//!
//! Writes are idempotent at the granularity of "insert if absent, else
//! update": every `add_*` first checks existence and routes to the update
//! path when the identifier is already present, so replaying an add is
//! safe. Multi-record writes are best-effort rather than transactional —
//! entities are independently addressable records, and a partial failure
//! surfaces to the caller so the orchestrator can retry or mark the unit
//! failed.

use std::mem;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::error::{RegistryError, Result};
use crate::model::{
    CompositeIdentifier, DataObject, DataTransferDetails, EntityAncestry, ErrorDetails, Experiment,
    ExperimentState, JobDetails, JobState, Status, StatusType, TaskDetails, TaskState,
    TransferState, WorkflowNodeDetails, WorkflowNodeState, generate_id,
};
use crate::store::{EntityKind, RecordFilter, RecordStore, StoredRecord};

/// Where an error-detail record attaches.
#[derive(Debug, Clone, Copy)]
pub enum ErrorTarget<'a> {
    /// Attach to a task.
    Task(&'a str),
    /// Attach to a job, addressed by (task id, job id).
    Job(&'a CompositeIdentifier),
}

/// The experiment lifecycle registry.
///
/// Cheap to clone; all state lives in the record store.
#[derive(Clone)]
pub struct ExperimentRegistry {
    store: Arc<dyn RecordStore>,
}

fn to_payload<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

fn from_payload<T: DeserializeOwned>(record: &StoredRecord) -> Result<T> {
    Ok(serde_json::from_value(record.payload.clone())?)
}

/// Storage id of the single current status record for an owner.
fn status_key(owner_key: &str, status_type: StatusType) -> String {
    format!("{}:{}", owner_key, status_type.as_str())
}

impl ExperimentRegistry {
    /// Create a registry over the given record store.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    async fn require(&self, kind: EntityKind, id: &str) -> Result<StoredRecord> {
        self.store
            .get(kind, id)
            .await?
            .ok_or_else(|| RegistryError::NotFound {
                kind,
                id: id.to_string(),
            })
    }

    /// Reject mutation of an experiment that already reached a terminal
    /// status. Error details are exempt and never pass through here.
    async fn guard_not_terminal(&self, experiment_id: &str) -> Result<()> {
        if let Some(status) = self.experiment_status(experiment_id).await? {
            if let Some(state) = ExperimentState::parse(&status.state) {
                if state.is_terminal() {
                    return Err(RegistryError::AlreadyTerminal {
                        experiment_id: experiment_id.to_string(),
                        state: status.state,
                    });
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Experiments
    // ========================================================================

    /// Persist a newly submitted experiment and its initial status.
    ///
    /// Assigns ids to the experiment and any nodes/tasks/transfers supplied
    /// inline, persists every entity as an independently addressable
    /// record, and writes the initial EXPERIMENT status (CREATED). If the
    /// experiment id is already present the call routes to
    /// [`update_experiment`](Self::update_experiment).
    #[instrument(skip(self, experiment), fields(name = %experiment.name))]
    pub async fn add_experiment(&self, mut experiment: Experiment) -> Result<String> {
        if experiment.name.trim().is_empty() {
            return Err(RegistryError::Validation {
                field: "name".to_string(),
                message: "experiment name must not be empty".to_string(),
            });
        }

        if !experiment.experiment_id.is_empty()
            && self
                .store
                .exists(EntityKind::Experiment, &experiment.experiment_id)
                .await?
        {
            let experiment_id = experiment.experiment_id.clone();
            debug!(%experiment_id, "add routed to update for existing experiment");
            self.update_experiment(&experiment_id, experiment).await?;
            return Ok(experiment_id);
        }

        if experiment.experiment_id.is_empty() {
            experiment.experiment_id = generate_id(&experiment.name);
        }
        let experiment_id = experiment.experiment_id.clone();
        let nodes = mem::take(&mut experiment.nodes);

        let record = StoredRecord::new(
            EntityKind::Experiment,
            &experiment_id,
            None,
            "",
            to_payload(&experiment)?,
        );
        self.store.create(record).await?;

        self.write_status(
            &experiment_id,
            StatusType::Experiment,
            ExperimentState::Created.as_str().to_string(),
            EntityAncestry::experiment(&experiment_id),
        )
        .await?;

        for node in nodes {
            self.persist_node(&experiment_id, node).await?;
        }

        debug!(%experiment_id, "experiment added");
        Ok(experiment_id)
    }

    /// Replace the experiment entity record. Nested nodes in the payload
    /// are ignored; they are addressed through their own operations.
    #[instrument(skip(self, experiment))]
    pub async fn update_experiment(
        &self,
        experiment_id: &str,
        mut experiment: Experiment,
    ) -> Result<()> {
        let existing = self.require(EntityKind::Experiment, experiment_id).await?;
        self.guard_not_terminal(experiment_id).await?;

        experiment.experiment_id = experiment_id.to_string();
        experiment.nodes = Vec::new();

        let mut record = existing;
        record.payload = to_payload(&experiment)?;
        self.store.save(record).await?;
        Ok(())
    }

    /// Fetch an experiment with its node/task/job/transfer hierarchy
    /// reassembled.
    pub async fn get_experiment(&self, experiment_id: &str) -> Result<Experiment> {
        let record = self.require(EntityKind::Experiment, experiment_id).await?;
        let mut experiment: Experiment = from_payload(&record)?;

        let node_records = self
            .store
            .query(
                EntityKind::WorkflowNode,
                &RecordFilter::by_parent(experiment_id),
            )
            .await?;
        let mut nodes = Vec::with_capacity(node_records.len());
        for node_record in &node_records {
            nodes.push(self.assemble_node(node_record).await?);
        }
        experiment.nodes = nodes;
        Ok(experiment)
    }

    /// Whether an experiment exists. Read-your-write consistent against
    /// the record store.
    pub async fn is_experiment_exist(&self, experiment_id: &str) -> Result<bool> {
        self.store.exists(EntityKind::Experiment, experiment_id).await
    }

    /// Remove an experiment and every descendant record (nodes, tasks,
    /// jobs, transfers, statuses, errors).
    #[instrument(skip(self))]
    pub async fn remove_experiment(&self, experiment_id: &str) -> Result<()> {
        for kind in [
            EntityKind::WorkflowNode,
            EntityKind::Task,
            EntityKind::Job,
            EntityKind::DataTransfer,
            EntityKind::Status,
            EntityKind::ErrorDetail,
        ] {
            let descendants = self
                .store
                .query(kind, &RecordFilter::by_ancestor(experiment_id))
                .await?;
            for record in descendants {
                self.store.remove(kind, &record.id).await?;
            }
        }
        self.store
            .remove(EntityKind::Experiment, experiment_id)
            .await?;
        Ok(())
    }

    /// Replace the experiment's output records.
    pub async fn update_experiment_outputs(
        &self,
        experiment_id: &str,
        outputs: Vec<DataObject>,
    ) -> Result<()> {
        let record = self.require(EntityKind::Experiment, experiment_id).await?;
        self.guard_not_terminal(experiment_id).await?;
        let mut experiment: Experiment = from_payload(&record)?;
        experiment.outputs = outputs;
        let mut record = record;
        record.payload = to_payload(&experiment)?;
        self.store.save(record).await?;
        Ok(())
    }

    /// Ids of all experiments owned by the given user.
    pub async fn experiment_ids_for_user(&self, user_name: &str) -> Result<Vec<String>> {
        let records = self
            .store
            .query(EntityKind::Experiment, &RecordFilter::default())
            .await?;
        let mut ids = Vec::new();
        for record in &records {
            let experiment: Experiment = from_payload(record)?;
            if experiment.user_name == user_name {
                ids.push(record.id.clone());
            }
        }
        Ok(ids)
    }

    // ========================================================================
    // Workflow nodes
    // ========================================================================

    async fn persist_node(
        &self,
        experiment_id: &str,
        mut node: WorkflowNodeDetails,
    ) -> Result<String> {
        if node.node_instance_id.is_empty() {
            node.node_instance_id = generate_id(&node.node_name);
        }
        let node_id = node.node_instance_id.clone();
        let tasks = mem::take(&mut node.tasks);

        let record = StoredRecord::new(
            EntityKind::WorkflowNode,
            &node_id,
            Some(experiment_id.to_string()),
            experiment_id,
            to_payload(&node)?,
        );
        self.store.create(record).await?;

        let ancestry = EntityAncestry {
            experiment_id: experiment_id.to_string(),
            node_id: Some(node_id.clone()),
            ..Default::default()
        };
        for task in tasks {
            self.persist_task(&ancestry, &node.node_name, task).await?;
        }
        Ok(node_id)
    }

    /// Add a workflow node under an experiment, returning the node
    /// instance id. Routes to update when the id is already present.
    #[instrument(skip(self, node), fields(node_name = %node.node_name))]
    pub async fn add_workflow_node(
        &self,
        node: WorkflowNodeDetails,
        experiment_id: &str,
    ) -> Result<String> {
        self.require(EntityKind::Experiment, experiment_id).await?;

        if !node.node_instance_id.is_empty()
            && self
                .store
                .exists(EntityKind::WorkflowNode, &node.node_instance_id)
                .await?
        {
            let node_id = node.node_instance_id.clone();
            debug!(%node_id, "add routed to update for existing node");
            self.update_workflow_node(&node_id, node).await?;
            return Ok(node_id);
        }

        self.persist_node(experiment_id, node).await
    }

    /// Replace the workflow node entity record. The node instance id is
    /// immutable; nested tasks in the payload are ignored.
    pub async fn update_workflow_node(
        &self,
        node_id: &str,
        mut node: WorkflowNodeDetails,
    ) -> Result<()> {
        let existing = self.require(EntityKind::WorkflowNode, node_id).await?;
        node.node_instance_id = node_id.to_string();
        node.tasks = Vec::new();
        let mut record = existing;
        record.payload = to_payload(&node)?;
        self.store.save(record).await?;
        Ok(())
    }

    async fn assemble_node(&self, node_record: &StoredRecord) -> Result<WorkflowNodeDetails> {
        let mut node: WorkflowNodeDetails = from_payload(node_record)?;
        let task_records = self
            .store
            .query(EntityKind::Task, &RecordFilter::by_parent(&node_record.id))
            .await?;
        let mut tasks = Vec::with_capacity(task_records.len());
        for task_record in &task_records {
            tasks.push(self.assemble_task(task_record).await?);
        }
        node.tasks = tasks;
        Ok(node)
    }

    /// Fetch a workflow node with its tasks reassembled.
    pub async fn get_workflow_node(&self, node_id: &str) -> Result<WorkflowNodeDetails> {
        let record = self.require(EntityKind::WorkflowNode, node_id).await?;
        self.assemble_node(&record).await
    }

    /// Whether a workflow node exists.
    pub async fn is_workflow_node_exist(&self, node_id: &str) -> Result<bool> {
        self.store.exists(EntityKind::WorkflowNode, node_id).await
    }

    /// Remove a workflow node and every descendant record.
    pub async fn remove_workflow_node(&self, node_id: &str) -> Result<()> {
        for kind in [
            EntityKind::Task,
            EntityKind::Job,
            EntityKind::DataTransfer,
            EntityKind::Status,
            EntityKind::ErrorDetail,
        ] {
            let descendants = self
                .store
                .query(kind, &RecordFilter::by_ancestor(node_id))
                .await?;
            for record in descendants {
                self.store.remove(kind, &record.id).await?;
            }
        }
        self.store.remove(EntityKind::WorkflowNode, node_id).await?;
        Ok(())
    }

    /// Node instance ids under an experiment, in creation order.
    pub async fn workflow_node_ids(&self, experiment_id: &str) -> Result<Vec<String>> {
        let records = self
            .store
            .query(
                EntityKind::WorkflowNode,
                &RecordFilter::by_parent(experiment_id),
            )
            .await?;
        Ok(records.into_iter().map(|r| r.id).collect())
    }

    /// Replace a node's output records.
    pub async fn update_node_outputs(
        &self,
        node_id: &str,
        outputs: Vec<DataObject>,
    ) -> Result<()> {
        let record = self.require(EntityKind::WorkflowNode, node_id).await?;
        let mut node: WorkflowNodeDetails = from_payload(&record)?;
        node.outputs = outputs;
        let mut record = record;
        record.payload = to_payload(&node)?;
        self.store.save(record).await?;
        Ok(())
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    async fn persist_task(
        &self,
        node_ancestry: &EntityAncestry,
        node_name: &str,
        mut task: TaskDetails,
    ) -> Result<String> {
        let node_id = node_ancestry.node_id.clone().unwrap_or_default();
        if task.task_id.is_empty() {
            // Task ids share the owning node's name prefix.
            task.task_id = generate_id(node_name);
        }
        let task_id = task.task_id.clone();
        let jobs = mem::take(&mut task.jobs);
        let mut transfers = mem::take(&mut task.transfers);

        let record = StoredRecord::new(
            EntityKind::Task,
            &task_id,
            Some(node_id.clone()),
            format!("{}/{}", node_ancestry.experiment_id, node_id),
            to_payload(&task)?,
        );
        self.store.create(record).await?;

        let task_ancestry = EntityAncestry {
            experiment_id: node_ancestry.experiment_id.clone(),
            node_id: Some(node_id),
            task_id: Some(task_id.clone()),
            job_id: None,
        };
        for job in jobs {
            if job.job_id.is_empty() {
                return Err(RegistryError::Validation {
                    field: "job_id".to_string(),
                    message: "job id must be assigned by the backend before persisting".to_string(),
                });
            }
            let ids = CompositeIdentifier::new(task_id.clone(), job.job_id.clone());
            self.persist_job(&task_ancestry, &ids, job).await?;
        }
        for transfer in transfers.drain(..) {
            self.persist_transfer(&task_ancestry, transfer).await?;
        }
        Ok(task_id)
    }

    /// Add a task under a workflow node, returning the task id. Routes to
    /// update when the id is already present.
    #[instrument(skip(self, task))]
    pub async fn add_task(&self, task: TaskDetails, node_id: &str) -> Result<String> {
        let node_record = self.require(EntityKind::WorkflowNode, node_id).await?;

        if !task.task_id.is_empty()
            && self.store.exists(EntityKind::Task, &task.task_id).await?
        {
            let task_id = task.task_id.clone();
            debug!(%task_id, "add routed to update for existing task");
            self.update_task(&task_id, task).await?;
            return Ok(task_id);
        }

        let node: WorkflowNodeDetails = from_payload(&node_record)?;
        let ancestry = EntityAncestry {
            experiment_id: node_record.ancestry.clone(),
            node_id: Some(node_id.to_string()),
            ..Default::default()
        };
        self.persist_task(&ancestry, &node.node_name, task).await
    }

    /// Replace the task entity record. Nested jobs/transfers in the
    /// payload are ignored.
    pub async fn update_task(&self, task_id: &str, mut task: TaskDetails) -> Result<()> {
        let existing = self.require(EntityKind::Task, task_id).await?;
        task.task_id = task_id.to_string();
        task.jobs = Vec::new();
        task.transfers = Vec::new();
        let mut record = existing;
        record.payload = to_payload(&task)?;
        self.store.save(record).await?;
        Ok(())
    }

    async fn assemble_task(&self, task_record: &StoredRecord) -> Result<TaskDetails> {
        let mut task: TaskDetails = from_payload(task_record)?;
        let job_records = self
            .store
            .query(EntityKind::Job, &RecordFilter::by_parent(&task_record.id))
            .await?;
        task.jobs = job_records
            .iter()
            .map(from_payload)
            .collect::<Result<Vec<JobDetails>>>()?;
        let transfer_records = self
            .store
            .query(
                EntityKind::DataTransfer,
                &RecordFilter::by_parent(&task_record.id),
            )
            .await?;
        task.transfers = transfer_records
            .iter()
            .map(from_payload)
            .collect::<Result<Vec<DataTransferDetails>>>()?;
        Ok(task)
    }

    /// Fetch a task with its jobs and transfers reassembled.
    pub async fn get_task(&self, task_id: &str) -> Result<TaskDetails> {
        let record = self.require(EntityKind::Task, task_id).await?;
        self.assemble_task(&record).await
    }

    /// Whether a task exists.
    pub async fn is_task_exist(&self, task_id: &str) -> Result<bool> {
        self.store.exists(EntityKind::Task, task_id).await
    }

    /// Remove a task and every descendant record.
    pub async fn remove_task(&self, task_id: &str) -> Result<()> {
        for kind in [
            EntityKind::Job,
            EntityKind::DataTransfer,
            EntityKind::Status,
            EntityKind::ErrorDetail,
        ] {
            let descendants = self
                .store
                .query(kind, &RecordFilter::by_ancestor(task_id))
                .await?;
            for record in descendants {
                self.store.remove(kind, &record.id).await?;
            }
        }
        self.store.remove(EntityKind::Task, task_id).await?;
        Ok(())
    }

    /// Task ids under a node, in creation order.
    pub async fn task_ids(&self, node_id: &str) -> Result<Vec<String>> {
        let records = self
            .store
            .query(EntityKind::Task, &RecordFilter::by_parent(node_id))
            .await?;
        Ok(records.into_iter().map(|r| r.id).collect())
    }

    /// Replace a task's application output records.
    pub async fn update_application_outputs(
        &self,
        task_id: &str,
        outputs: Vec<DataObject>,
    ) -> Result<()> {
        let record = self.require(EntityKind::Task, task_id).await?;
        let mut task: TaskDetails = from_payload(&record)?;
        task.application_outputs = outputs;
        let mut record = record;
        record.payload = to_payload(&task)?;
        self.store.save(record).await?;
        Ok(())
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    async fn persist_job(
        &self,
        task_ancestry: &EntityAncestry,
        ids: &CompositeIdentifier,
        mut job: JobDetails,
    ) -> Result<String> {
        job.job_id = ids.second_level.clone();
        let record = StoredRecord::new(
            EntityKind::Job,
            ids.storage_key(),
            Some(ids.top_level.clone()),
            task_ancestry.path(),
            to_payload(&job)?,
        );
        self.store.create(record).await?;
        Ok(ids.second_level.clone())
    }

    /// Add a job under a task, addressed by (task id, job id). Routes to
    /// update when the job is already present.
    #[instrument(skip(self, job), fields(ids = %ids))]
    pub async fn add_job(&self, job: JobDetails, ids: &CompositeIdentifier) -> Result<String> {
        let task_ancestry = self.task_ancestry(&ids.top_level).await?;

        if self
            .store
            .exists(EntityKind::Job, &ids.storage_key())
            .await?
        {
            debug!(%ids, "add routed to update for existing job");
            self.update_job(ids, job).await?;
            return Ok(ids.second_level.clone());
        }

        self.persist_job(&task_ancestry, ids, job).await
    }

    /// Replace the job entity record.
    pub async fn update_job(&self, ids: &CompositeIdentifier, mut job: JobDetails) -> Result<()> {
        let existing = self.require(EntityKind::Job, &ids.storage_key()).await?;
        job.job_id = ids.second_level.clone();
        let mut record = existing;
        record.payload = to_payload(&job)?;
        self.store.save(record).await?;
        Ok(())
    }

    /// Fetch a job by (task id, job id).
    pub async fn get_job(&self, ids: &CompositeIdentifier) -> Result<JobDetails> {
        let record = self.require(EntityKind::Job, &ids.storage_key()).await?;
        from_payload(&record)
    }

    /// Whether a job exists under the given task.
    pub async fn is_job_exist(&self, ids: &CompositeIdentifier) -> Result<bool> {
        self.store.exists(EntityKind::Job, &ids.storage_key()).await
    }

    /// Remove a job along with its statuses and errors.
    pub async fn remove_job(&self, ids: &CompositeIdentifier) -> Result<()> {
        let key = ids.storage_key();
        for status_type in [StatusType::Job, StatusType::Application] {
            self.store
                .remove(EntityKind::Status, &status_key(&key, status_type))
                .await?;
        }
        let errors = self
            .store
            .query(EntityKind::ErrorDetail, &RecordFilter::by_parent(&key))
            .await?;
        for record in errors {
            self.store.remove(EntityKind::ErrorDetail, &record.id).await?;
        }
        self.store.remove(EntityKind::Job, &key).await?;
        Ok(())
    }

    /// Backend job ids under a task, in creation order.
    pub async fn job_ids(&self, task_id: &str) -> Result<Vec<String>> {
        let records = self
            .store
            .query(EntityKind::Job, &RecordFilter::by_parent(task_id))
            .await?;
        let mut ids = Vec::with_capacity(records.len());
        for record in &records {
            let job: JobDetails = from_payload(record)?;
            ids.push(job.job_id);
        }
        Ok(ids)
    }

    // ========================================================================
    // Data transfers
    // ========================================================================

    async fn persist_transfer(
        &self,
        task_ancestry: &EntityAncestry,
        mut transfer: DataTransferDetails,
    ) -> Result<String> {
        let task_id = task_ancestry.task_id.clone().unwrap_or_default();
        if transfer.transfer_id.is_empty() {
            transfer.transfer_id = generate_id(&task_id);
        }
        let transfer_id = transfer.transfer_id.clone();
        let record = StoredRecord::new(
            EntityKind::DataTransfer,
            &transfer_id,
            Some(task_id),
            task_ancestry.path(),
            to_payload(&transfer)?,
        );
        self.store.create(record).await?;
        Ok(transfer_id)
    }

    /// Add a data transfer under a task, returning the transfer id.
    /// Routes to update when the id is already present.
    #[instrument(skip(self, transfer))]
    pub async fn add_data_transfer(
        &self,
        transfer: DataTransferDetails,
        task_id: &str,
    ) -> Result<String> {
        if transfer.transfer_description.is_empty() {
            return Err(RegistryError::Validation {
                field: "transfer_description".to_string(),
                message: "data transfer description must not be empty".to_string(),
            });
        }
        let task_ancestry = self.task_ancestry(task_id).await?;

        if !transfer.transfer_id.is_empty()
            && self
                .store
                .exists(EntityKind::DataTransfer, &transfer.transfer_id)
                .await?
        {
            let ids = CompositeIdentifier::new(task_id, transfer.transfer_id.clone());
            debug!(transfer_id = %ids.second_level, "add routed to update for existing transfer");
            self.update_data_transfer(&ids, transfer).await?;
            return Ok(ids.second_level);
        }

        self.persist_transfer(&task_ancestry, transfer).await
    }

    /// Replace the data-transfer entity record, addressed by
    /// (task id, transfer id).
    pub async fn update_data_transfer(
        &self,
        ids: &CompositeIdentifier,
        mut transfer: DataTransferDetails,
    ) -> Result<()> {
        let existing = self
            .require(EntityKind::DataTransfer, &ids.second_level)
            .await?;
        if existing.parent_id.as_deref() != Some(ids.top_level.as_str()) {
            return Err(RegistryError::NotFound {
                kind: EntityKind::DataTransfer,
                id: ids.storage_key(),
            });
        }
        transfer.transfer_id = ids.second_level.clone();
        let mut record = existing;
        record.payload = to_payload(&transfer)?;
        self.store.save(record).await?;
        Ok(())
    }

    /// Fetch a data transfer by (task id, transfer id).
    pub async fn get_data_transfer(
        &self,
        ids: &CompositeIdentifier,
    ) -> Result<DataTransferDetails> {
        let record = self
            .require(EntityKind::DataTransfer, &ids.second_level)
            .await?;
        if record.parent_id.as_deref() != Some(ids.top_level.as_str()) {
            return Err(RegistryError::NotFound {
                kind: EntityKind::DataTransfer,
                id: ids.storage_key(),
            });
        }
        from_payload(&record)
    }

    /// Whether a data transfer exists under the given task.
    pub async fn is_data_transfer_exist(&self, ids: &CompositeIdentifier) -> Result<bool> {
        match self
            .store
            .get(EntityKind::DataTransfer, &ids.second_level)
            .await?
        {
            Some(record) => Ok(record.parent_id.as_deref() == Some(ids.top_level.as_str())),
            None => Ok(false),
        }
    }

    /// Remove a data transfer along with its status.
    pub async fn remove_data_transfer(&self, ids: &CompositeIdentifier) -> Result<()> {
        self.store
            .remove(
                EntityKind::Status,
                &status_key(&ids.second_level, StatusType::DataTransfer),
            )
            .await?;
        self.store
            .remove(EntityKind::DataTransfer, &ids.second_level)
            .await?;
        Ok(())
    }

    /// Transfer ids under a task, in creation order.
    pub async fn transfer_ids(&self, task_id: &str) -> Result<Vec<String>> {
        let records = self
            .store
            .query(EntityKind::DataTransfer, &RecordFilter::by_parent(task_id))
            .await?;
        Ok(records.into_iter().map(|r| r.id).collect())
    }

    // ========================================================================
    // Ancestry resolution
    // ========================================================================

    async fn node_ancestry(&self, node_id: &str) -> Result<EntityAncestry> {
        let record = self.require(EntityKind::WorkflowNode, node_id).await?;
        Ok(EntityAncestry {
            experiment_id: record.ancestry.clone(),
            node_id: Some(node_id.to_string()),
            ..Default::default()
        })
    }

    async fn task_ancestry(&self, task_id: &str) -> Result<EntityAncestry> {
        let record = self.require(EntityKind::Task, task_id).await?;
        let mut segments = record.ancestry.split('/');
        let experiment_id = segments.next().unwrap_or_default().to_string();
        let node_id = segments.next().map(str::to_string);
        Ok(EntityAncestry {
            experiment_id,
            node_id,
            task_id: Some(task_id.to_string()),
            job_id: None,
        })
    }

    async fn job_ancestry(&self, ids: &CompositeIdentifier) -> Result<EntityAncestry> {
        let mut ancestry = self.task_ancestry(&ids.top_level).await?;
        self.require(EntityKind::Job, &ids.storage_key()).await?;
        ancestry.job_id = Some(ids.second_level.clone());
        Ok(ancestry)
    }

    // ========================================================================
    // Statuses
    // ========================================================================

    async fn write_status(
        &self,
        owner_key: &str,
        status_type: StatusType,
        state: String,
        ancestry: EntityAncestry,
    ) -> Result<()> {
        let status = Status {
            status_type,
            state,
            updated_at: chrono::Utc::now(),
            ancestry: ancestry.clone(),
        };
        let record = StoredRecord::new(
            EntityKind::Status,
            status_key(owner_key, status_type),
            Some(owner_key.to_string()),
            ancestry.path(),
            to_payload(&status)?,
        );
        self.store.save(record).await?;
        Ok(())
    }

    async fn read_status(&self, owner_key: &str, status_type: StatusType) -> Result<Option<Status>> {
        let record = self
            .store
            .get(EntityKind::Status, &status_key(owner_key, status_type))
            .await?;
        record.as_ref().map(from_payload).transpose()
    }

    /// Write the experiment status; a missing state defaults to UNKNOWN.
    /// Identical to [`update_experiment_status`](Self::update_experiment_status).
    pub async fn add_experiment_status(
        &self,
        experiment_id: &str,
        state: Option<ExperimentState>,
    ) -> Result<()> {
        self.update_experiment_status(experiment_id, state).await
    }

    /// Overwrite the experiment's current status in place.
    ///
    /// Refused with [`RegistryError::AlreadyTerminal`] once the experiment
    /// reached DONE, FAILED, or CANCELLED.
    #[instrument(skip(self))]
    pub async fn update_experiment_status(
        &self,
        experiment_id: &str,
        state: Option<ExperimentState>,
    ) -> Result<()> {
        self.require(EntityKind::Experiment, experiment_id).await?;
        self.guard_not_terminal(experiment_id).await?;
        let state = state.unwrap_or_default();
        self.write_status(
            experiment_id,
            StatusType::Experiment,
            state.as_str().to_string(),
            EntityAncestry::experiment(experiment_id),
        )
        .await
    }

    /// The experiment's current status, `None` before the first write.
    pub async fn experiment_status(&self, experiment_id: &str) -> Result<Option<Status>> {
        self.read_status(experiment_id, StatusType::Experiment).await
    }

    /// Write a workflow node's status; a missing state defaults to UNKNOWN.
    pub async fn add_workflow_node_status(
        &self,
        node_id: &str,
        state: Option<WorkflowNodeState>,
    ) -> Result<()> {
        self.update_workflow_node_status(node_id, state).await
    }

    /// Overwrite a workflow node's current status in place.
    pub async fn update_workflow_node_status(
        &self,
        node_id: &str,
        state: Option<WorkflowNodeState>,
    ) -> Result<()> {
        let ancestry = self.node_ancestry(node_id).await?;
        let state = state.unwrap_or_default();
        self.write_status(
            node_id,
            StatusType::WorkflowNode,
            state.as_str().to_string(),
            ancestry,
        )
        .await
    }

    /// A workflow node's current status, `None` before the first write.
    pub async fn workflow_node_status(&self, node_id: &str) -> Result<Option<Status>> {
        self.read_status(node_id, StatusType::WorkflowNode).await
    }

    /// Write a task's status; a missing state defaults to UNKNOWN.
    pub async fn add_task_status(&self, task_id: &str, state: Option<TaskState>) -> Result<()> {
        self.update_task_status(task_id, state).await
    }

    /// Overwrite a task's current status in place.
    pub async fn update_task_status(&self, task_id: &str, state: Option<TaskState>) -> Result<()> {
        let ancestry = self.task_ancestry(task_id).await?;
        let state = state.unwrap_or_default();
        self.write_status(
            task_id,
            StatusType::Task,
            state.as_str().to_string(),
            ancestry,
        )
        .await
    }

    /// A task's current status, `None` before the first write.
    pub async fn task_status(&self, task_id: &str) -> Result<Option<Status>> {
        self.read_status(task_id, StatusType::Task).await
    }

    /// Write a job's status; a missing state defaults to UNKNOWN.
    pub async fn add_job_status(
        &self,
        ids: &CompositeIdentifier,
        state: Option<JobState>,
    ) -> Result<()> {
        self.update_job_status(ids, state).await
    }

    /// Overwrite a job's current status in place.
    pub async fn update_job_status(
        &self,
        ids: &CompositeIdentifier,
        state: Option<JobState>,
    ) -> Result<()> {
        let ancestry = self.job_ancestry(ids).await?;
        let state = state.unwrap_or_default();
        self.write_status(
            &ids.storage_key(),
            StatusType::Job,
            state.as_str().to_string(),
            ancestry,
        )
        .await
    }

    /// A job's current status, `None` before the first write.
    pub async fn job_status(&self, ids: &CompositeIdentifier) -> Result<Option<Status>> {
        self.read_status(&ids.storage_key(), StatusType::Job).await
    }

    /// Write a job's application status (backend-defined state string);
    /// missing defaults to UNKNOWN.
    pub async fn add_application_status(
        &self,
        ids: &CompositeIdentifier,
        state: Option<String>,
    ) -> Result<()> {
        self.update_application_status(ids, state).await
    }

    /// Overwrite a job's application status in place.
    pub async fn update_application_status(
        &self,
        ids: &CompositeIdentifier,
        state: Option<String>,
    ) -> Result<()> {
        let ancestry = self.job_ancestry(ids).await?;
        let state = state.unwrap_or_else(|| "UNKNOWN".to_string());
        self.write_status(&ids.storage_key(), StatusType::Application, state, ancestry)
            .await
    }

    /// A job's application status, `None` before the first write.
    pub async fn application_status(&self, ids: &CompositeIdentifier) -> Result<Option<Status>> {
        self.read_status(&ids.storage_key(), StatusType::Application)
            .await
    }

    /// Write a transfer's status; a missing state defaults to UNKNOWN.
    pub async fn add_transfer_status(
        &self,
        ids: &CompositeIdentifier,
        state: Option<TransferState>,
    ) -> Result<()> {
        self.update_transfer_status(ids, state).await
    }

    /// Overwrite a transfer's current status in place.
    pub async fn update_transfer_status(
        &self,
        ids: &CompositeIdentifier,
        state: Option<TransferState>,
    ) -> Result<()> {
        let transfer_record = self
            .require(EntityKind::DataTransfer, &ids.second_level)
            .await?;
        let mut segments = transfer_record.ancestry.split('/');
        let ancestry = EntityAncestry {
            experiment_id: segments.next().unwrap_or_default().to_string(),
            node_id: segments.next().map(str::to_string),
            task_id: Some(ids.top_level.clone()),
            job_id: None,
        };
        let state = state.unwrap_or_default();
        self.write_status(
            &ids.second_level,
            StatusType::DataTransfer,
            state.as_str().to_string(),
            ancestry,
        )
        .await
    }

    /// A transfer's current status, `None` before the first write.
    pub async fn transfer_status(&self, ids: &CompositeIdentifier) -> Result<Option<Status>> {
        self.read_status(&ids.second_level, StatusType::DataTransfer)
            .await
    }

    // ========================================================================
    // Error details
    // ========================================================================

    /// Attach error diagnostics to a task or a job.
    ///
    /// The full owning chain is resolved once and stored on the record, so
    /// the error is retrievable by task, node, or experiment id. Allowed
    /// even after the experiment reached a terminal status.
    #[instrument(skip(self, error))]
    pub async fn add_error_details(
        &self,
        mut error: ErrorDetails,
        target: ErrorTarget<'_>,
    ) -> Result<String> {
        let (owner_key, ancestry) = match target {
            ErrorTarget::Task(task_id) => {
                (task_id.to_string(), self.task_ancestry(task_id).await?)
            }
            ErrorTarget::Job(ids) => (ids.storage_key(), self.job_ancestry(ids).await?),
        };

        if error.error_id.is_empty() {
            error.error_id = generate_id(&owner_key);
        }
        let error_id = error.error_id.clone();

        let record = StoredRecord::new(
            EntityKind::ErrorDetail,
            &error_id,
            Some(owner_key),
            ancestry.path(),
            to_payload(&error)?,
        );
        self.store.save(record).await?;

        warn!(%error_id, "error details recorded");
        Ok(error_id)
    }

    /// Fetch a single error-detail record by id.
    pub async fn get_error_details(&self, error_id: &str) -> Result<ErrorDetails> {
        let record = self.require(EntityKind::ErrorDetail, error_id).await?;
        from_payload(&record)
    }

    /// Every error recorded under the given ancestor (experiment, node,
    /// task, or job id), oldest first.
    pub async fn errors_for(&self, ancestor_id: &str) -> Result<Vec<ErrorDetails>> {
        let records = self
            .store
            .query(
                EntityKind::ErrorDetail,
                &RecordFilter::by_ancestor(ancestor_id),
            )
            .await?;
        records.iter().map(from_payload).collect()
    }

    /// Every error recorded anywhere under an experiment.
    pub async fn experiment_errors(&self, experiment_id: &str) -> Result<Vec<ErrorDetails>> {
        self.errors_for(experiment_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use chrono::Utc;

    fn registry() -> ExperimentRegistry {
        ExperimentRegistry::new(Arc::new(MemoryRecordStore::new()))
    }

    fn experiment(name: &str) -> Experiment {
        Experiment {
            experiment_id: String::new(),
            name: name.to_string(),
            user_name: "alice".to_string(),
            gateway_id: "chem-gateway".to_string(),
            creation_time: Utc::now(),
            inputs: vec![],
            outputs: vec![],
            nodes: vec![],
        }
    }

    fn node(name: &str) -> WorkflowNodeDetails {
        WorkflowNodeDetails {
            node_instance_id: String::new(),
            node_name: name.to_string(),
            creation_time: Utc::now(),
            inputs: vec![],
            outputs: vec![],
            tasks: vec![],
        }
    }

    fn task(app: &str) -> TaskDetails {
        TaskDetails {
            task_id: String::new(),
            creation_time: Utc::now(),
            application_id: app.to_string(),
            application_version: None,
            application_inputs: vec![],
            application_outputs: vec![],
            scheduling: None,
            jobs: vec![],
            transfers: vec![],
        }
    }

    async fn seeded_task(registry: &ExperimentRegistry) -> (String, String, String) {
        let experiment_id = registry
            .add_experiment(experiment("seed exp"))
            .await
            .unwrap();
        let node_id = registry
            .add_workflow_node(node("seed node"), &experiment_id)
            .await
            .unwrap();
        let task_id = registry.add_task(task("app"), &node_id).await.unwrap();
        (experiment_id, node_id, task_id)
    }

    #[tokio::test]
    async fn test_add_experiment_assigns_prefixed_id_and_initial_status() {
        let registry = registry();
        let id = registry
            .add_experiment(experiment("echo test"))
            .await
            .unwrap();
        assert!(id.starts_with("echotest_"));

        let status = registry.experiment_status(&id).await.unwrap().unwrap();
        assert_eq!(status.state, "CREATED");
        assert_eq!(status.status_type, StatusType::Experiment);
    }

    #[tokio::test]
    async fn test_exists_false_before_true_after() {
        let registry = registry();
        let mut exp = experiment("probe");
        exp.experiment_id = "probe_fixed-id".to_string();
        assert!(!registry.is_experiment_exist("probe_fixed-id").await.unwrap());
        registry.add_experiment(exp).await.unwrap();
        assert!(registry.is_experiment_exist("probe_fixed-id").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_twice_equals_add_then_update() {
        let registry = registry();
        let mut exp = experiment("repeat");
        exp.experiment_id = "repeat_1".to_string();
        registry.add_experiment(exp.clone()).await.unwrap();

        exp.gateway_id = "second-gateway".to_string();
        let id = registry.add_experiment(exp).await.unwrap();
        assert_eq!(id, "repeat_1");

        let stored = registry.get_experiment("repeat_1").await.unwrap();
        assert_eq!(stored.gateway_id, "second-gateway");
    }

    #[tokio::test]
    async fn test_add_experiment_empty_name_rejected() {
        let registry = registry();
        let err = registry.add_experiment(experiment("  ")).await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_nested_submission_persists_hierarchy() {
        let registry = registry();
        let mut exp = experiment("nested");
        let mut n = node("stage one");
        n.tasks.push(task("gaussian"));
        exp.nodes.push(n);

        let experiment_id = registry.add_experiment(exp).await.unwrap();
        let fetched = registry.get_experiment(&experiment_id).await.unwrap();
        assert_eq!(fetched.nodes.len(), 1);
        assert!(fetched.nodes[0].node_instance_id.starts_with("stageone_"));
        assert_eq!(fetched.nodes[0].tasks.len(), 1);
        assert!(!fetched.nodes[0].tasks[0].task_id.is_empty());
    }

    #[tokio::test]
    async fn test_add_node_requires_experiment() {
        let registry = registry();
        let err = registry
            .add_workflow_node(node("orphan"), "missing-exp")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_job_add_get_update_via_composite_id() {
        let registry = registry();
        let (_, _, task_id) = seeded_task(&registry).await;
        let ids = CompositeIdentifier::new(task_id.clone(), "pbs-123");

        let mut job = JobDetails {
            job_id: String::new(),
            job_description: "#PBS -l nodes=2".to_string(),
            creation_time: Utc::now(),
            resource_consumption: None,
        };
        let job_id = registry.add_job(job.clone(), &ids).await.unwrap();
        assert_eq!(job_id, "pbs-123");
        assert!(registry.is_job_exist(&ids).await.unwrap());

        job.job_description = "#PBS -l nodes=4".to_string();
        // Second add routes to update.
        registry.add_job(job, &ids).await.unwrap();
        let stored = registry.get_job(&ids).await.unwrap();
        assert_eq!(stored.job_description, "#PBS -l nodes=4");
        assert_eq!(registry.job_ids(&task_id).await.unwrap(), vec!["pbs-123"]);
    }

    #[tokio::test]
    async fn test_status_defaults_to_unknown() {
        let registry = registry();
        let (_, _, task_id) = seeded_task(&registry).await;
        registry.add_task_status(&task_id, None).await.unwrap();
        let status = registry.task_status(&task_id).await.unwrap().unwrap();
        assert_eq!(status.state, "UNKNOWN");
    }

    #[tokio::test]
    async fn test_status_overwrites_in_place() {
        let registry = registry();
        let (_, _, task_id) = seeded_task(&registry).await;
        registry
            .add_task_status(&task_id, Some(TaskState::Started))
            .await
            .unwrap();
        registry
            .add_task_status(&task_id, Some(TaskState::Executing))
            .await
            .unwrap();
        let status = registry.task_status(&task_id).await.unwrap().unwrap();
        assert_eq!(status.state, "EXECUTING");
    }

    #[tokio::test]
    async fn test_terminal_experiment_rejects_status_updates() {
        let registry = registry();
        let id = registry.add_experiment(experiment("final")).await.unwrap();
        registry
            .update_experiment_status(&id, Some(ExperimentState::Done))
            .await
            .unwrap();

        let err = registry
            .update_experiment_status(&id, Some(ExperimentState::Executing))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "ALREADY_TERMINAL");
    }

    #[tokio::test]
    async fn test_error_attachment_visible_from_all_ancestors() {
        let registry = registry();
        let (experiment_id, node_id, task_id) = seeded_task(&registry).await;

        let error_id = registry
            .add_error_details(
                ErrorDetails::new("segfault in solver"),
                ErrorTarget::Task(&task_id),
            )
            .await
            .unwrap();

        let direct = registry.get_error_details(&error_id).await.unwrap();
        assert_eq!(direct.actual_error_message, "segfault in solver");

        for ancestor in [&experiment_id, &node_id, &task_id] {
            let errors = registry.errors_for(ancestor).await.unwrap();
            assert_eq!(errors.len(), 1, "error not visible from {}", ancestor);
            assert_eq!(errors[0].error_id, error_id);
        }
    }

    #[tokio::test]
    async fn test_error_attachment_to_job() {
        let registry = registry();
        let (experiment_id, _, task_id) = seeded_task(&registry).await;
        let ids = CompositeIdentifier::new(task_id.clone(), "slurm-9");
        registry
            .add_job(
                JobDetails {
                    job_id: String::new(),
                    job_description: "sbatch".to_string(),
                    creation_time: Utc::now(),
                    resource_consumption: None,
                },
                &ids,
            )
            .await
            .unwrap();

        registry
            .add_error_details(ErrorDetails::new("node failure"), ErrorTarget::Job(&ids))
            .await
            .unwrap();

        assert_eq!(registry.errors_for(&task_id).await.unwrap().len(), 1);
        assert_eq!(
            registry.experiment_errors(&experiment_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_error_allowed_after_terminal_status() {
        let registry = registry();
        let (experiment_id, _, task_id) = seeded_task(&registry).await;
        registry
            .update_experiment_status(&experiment_id, Some(ExperimentState::Failed))
            .await
            .unwrap();

        registry
            .add_error_details(
                ErrorDetails::new("backend unreachable"),
                ErrorTarget::Task(&task_id),
            )
            .await
            .unwrap();
        assert_eq!(
            registry.experiment_errors(&experiment_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_data_transfer_lifecycle() {
        let registry = registry();
        let (_, _, task_id) = seeded_task(&registry).await;

        let transfer = DataTransferDetails {
            transfer_id: String::new(),
            transfer_description: "stage input deck".to_string(),
            creation_time: Utc::now(),
        };
        let transfer_id = registry
            .add_data_transfer(transfer, &task_id)
            .await
            .unwrap();
        let ids = CompositeIdentifier::new(task_id.clone(), transfer_id.clone());
        assert!(registry.is_data_transfer_exist(&ids).await.unwrap());

        registry
            .add_transfer_status(&ids, Some(TransferState::Staging))
            .await
            .unwrap();
        let status = registry.transfer_status(&ids).await.unwrap().unwrap();
        assert_eq!(status.state, "STAGING");

        registry.remove_data_transfer(&ids).await.unwrap();
        assert!(!registry.is_data_transfer_exist(&ids).await.unwrap());
        assert!(registry.transfer_status(&ids).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_data_transfer_requires_description() {
        let registry = registry();
        let (_, _, task_id) = seeded_task(&registry).await;
        let err = registry
            .add_data_transfer(
                DataTransferDetails {
                    transfer_id: String::new(),
                    transfer_description: String::new(),
                    creation_time: Utc::now(),
                },
                &task_id,
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_remove_experiment_removes_descendants() {
        let registry = registry();
        let (experiment_id, node_id, task_id) = seeded_task(&registry).await;
        registry
            .add_task_status(&task_id, Some(TaskState::Started))
            .await
            .unwrap();

        registry.remove_experiment(&experiment_id).await.unwrap();
        assert!(!registry.is_experiment_exist(&experiment_id).await.unwrap());
        assert!(!registry.is_workflow_node_exist(&node_id).await.unwrap());
        assert!(!registry.is_task_exist(&task_id).await.unwrap());
        assert!(registry.task_status(&task_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_listing_operations() {
        let registry = registry();
        let (experiment_id, node_id, task_id) = seeded_task(&registry).await;
        registry
            .add_task(task("second-app"), &node_id)
            .await
            .unwrap();

        assert_eq!(
            registry.workflow_node_ids(&experiment_id).await.unwrap(),
            vec![node_id.clone()]
        );
        let tasks = registry.task_ids(&node_id).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.contains(&task_id));

        assert_eq!(
            registry.experiment_ids_for_user("alice").await.unwrap(),
            vec![experiment_id]
        );
        assert!(registry
            .experiment_ids_for_user("bob")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_update_outputs() {
        let registry = registry();
        let (experiment_id, node_id, task_id) = seeded_task(&registry).await;
        let outputs = vec![DataObject {
            name: "energy".to_string(),
            value: "-76.4".to_string(),
            ..Default::default()
        }];

        registry
            .update_experiment_outputs(&experiment_id, outputs.clone())
            .await
            .unwrap();
        registry
            .update_node_outputs(&node_id, outputs.clone())
            .await
            .unwrap();
        registry
            .update_application_outputs(&task_id, outputs.clone())
            .await
            .unwrap();

        let exp = registry.get_experiment(&experiment_id).await.unwrap();
        assert_eq!(exp.outputs, outputs);
        assert_eq!(exp.nodes[0].outputs, outputs);
        assert_eq!(exp.nodes[0].tasks[0].application_outputs, outputs);
    }
}
