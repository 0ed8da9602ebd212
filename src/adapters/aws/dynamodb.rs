use crate::domain::jobs::{
    display_name, Job, JobId, JobStatus, JobUpdate, Mode, Precondition, TranscodeParams,
};
use crate::error::{RepositoryError, RepositoryResult};
use crate::ports::repository::JobRepository;
use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::collections::HashMap;

type Item = HashMap<String, AttributeValue>;

const JOB_ID: &str = "JobId";
const INPUT_KEY: &str = "InputKey";
const NAME: &str = "Name";
const OUTPUT_FORMAT: &str = "OutputFormat";
const RESOLUTION: &str = "Resolution";
const VIDEO_CODEC: &str = "VideoCodec";
const STATUS: &str = "Status";
const OUTPUT_KEY: &str = "OutputKey";
const HLS_OUTPUT_KEY: &str = "HLSOutputKey";
const DURATION_SECONDS: &str = "DurationSeconds";
const MODE: &str = "Mode";
const CREATED_AT: &str = "CreatedAt";
const LEASE_OWNER: &str = "LeaseOwner";
const LEASE_EXPIRES_AT: &str = "LeaseExpiresAt";

/// DynamoAdapter implements JobRepository for AWS DynamoDB.
#[derive(Clone)]
pub struct DynamoAdapter {
    client: Client,
    table_name: String,
    defaults: TranscodeParams,
}

impl DynamoAdapter {
    /// `defaults` fills transcoding parameters missing from a record.
    pub fn new(client: Client, table_name: String, defaults: TranscodeParams) -> Self {
        Self {
            client,
            table_name,
            defaults,
        }
    }

    async fn conditional_update(
        &self,
        id: &JobId,
        update: &JobUpdate,
        condition: Expression,
    ) -> RepositoryResult<bool> {
        let mut expr = condition;
        let set_clause = expr.set_clause(update);

        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key(JOB_ID, AttributeValue::S(id.to_string()))
            .update_expression(set_clause)
            .condition_expression(expr.condition.join(" AND "))
            .set_expression_attribute_names(Some(expr.names))
            .set_expression_attribute_values(expr.values.into_non_empty())
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e)
                if e.as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    == Some(true) =>
            {
                Ok(false)
            }
            Err(e) => Err(RepositoryError::backend(DisplayErrorContext(&e))),
        }
    }
}

#[async_trait]
impl JobRepository for DynamoAdapter {
    async fn scan_by_status(&self, status: JobStatus) -> RepositoryResult<Vec<Job>> {
        let mut jobs = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let resp = self
                .client
                .scan()
                .table_name(&self.table_name)
                .filter_expression("#s = :status")
                .expression_attribute_names("#s", STATUS)
                .expression_attribute_values(":status", AttributeValue::S(status.to_string()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| RepositoryError::backend(DisplayErrorContext(&e)))?;

            for item in resp.items() {
                jobs.push(job_from_item(item, &self.defaults)?);
            }

            match resp.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    async fn get_job(&self, id: &JobId) -> RepositoryResult<Option<Job>> {
        let resp = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(JOB_ID, AttributeValue::S(id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| RepositoryError::backend(DisplayErrorContext(&e)))?;

        resp.item
            .map(|item| job_from_item(&item, &self.defaults))
            .transpose()
    }

    async fn put_job(&self, job: &Job) -> RepositoryResult<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(job_to_item(job)))
            .condition_expression("attribute_not_exists(#id)")
            .expression_attribute_names("#id", JOB_ID)
            .send()
            .await
            .map_err(|e| RepositoryError::backend(DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        id: &JobId,
        precondition: &Precondition,
        update: &JobUpdate,
    ) -> RepositoryResult<bool> {
        self.conditional_update(id, update, Expression::for_precondition(precondition))
            .await
    }

    async fn update(&self, id: &JobId, update: &JobUpdate) -> RepositoryResult<()> {
        let mut expr = Expression::default();
        let id_name = expr.name(JOB_ID);
        expr.condition.push(format!("attribute_exists({})", id_name));

        if self.conditional_update(id, update, expr).await? {
            Ok(())
        } else {
            Err(RepositoryError::NotFound(id.to_string()))
        }
    }
}

/// Placeholder bookkeeping for condition and update expressions.
#[derive(Debug, Default)]
struct Expression {
    names: HashMap<String, String>,
    values: Values,
    condition: Vec<String>,
}

#[derive(Debug, Default)]
struct Values(HashMap<String, AttributeValue>);

impl Values {
    fn into_non_empty(self) -> Option<HashMap<String, AttributeValue>> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0)
        }
    }
}

impl Expression {
    fn for_precondition(precondition: &Precondition) -> Self {
        let mut expr = Expression::default();
        let status = expr.name(STATUS);
        match precondition {
            Precondition::StatusIs(expected) => {
                let v = expr.value(AttributeValue::S(expected.to_string()));
                expr.condition.push(format!("{} = {}", status, v));
            }
            Precondition::LeaseExpired { now } => {
                let processing = expr.value(AttributeValue::S(JobStatus::Processing.to_string()));
                let lease = expr.name(LEASE_EXPIRES_AT);
                let now = expr.value(AttributeValue::S(timestamp(*now)));
                expr.condition.push(format!("{} = {}", status, processing));
                expr.condition.push(format!("{} < {}", lease, now));
            }
            Precondition::LeaseHeldBy(owner) => {
                let processing = expr.value(AttributeValue::S(JobStatus::Processing.to_string()));
                let lease_owner = expr.name(LEASE_OWNER);
                let owner = expr.value(AttributeValue::S(owner.clone()));
                expr.condition.push(format!("{} = {}", status, processing));
                expr.condition.push(format!("{} = {}", lease_owner, owner));
            }
        }
        expr
    }

    fn name(&mut self, attribute: &str) -> String {
        let placeholder = format!("#{}", attribute.to_ascii_lowercase());
        self.names
            .insert(placeholder.clone(), attribute.to_string());
        placeholder
    }

    fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.values.0.len());
        self.values.0.insert(placeholder.clone(), value);
        placeholder
    }

    fn set_clause(&mut self, update: &JobUpdate) -> String {
        let mut sets = Vec::new();
        let mut set = |expr: &mut Self, attribute: &str, value: AttributeValue| {
            let name = expr.name(attribute);
            let value = expr.value(value);
            sets.push(format!("{} = {}", name, value));
        };

        if let Some(status) = update.status {
            set(self, STATUS, AttributeValue::S(status.to_string()));
        }
        if let Some(key) = &update.output_key {
            set(self, OUTPUT_KEY, AttributeValue::S(key.clone()));
        }
        if let Some(key) = &update.hls_output_key {
            set(self, HLS_OUTPUT_KEY, AttributeValue::S(key.clone()));
        }
        if let Some(duration) = update.duration_seconds {
            set(self, DURATION_SECONDS, AttributeValue::N(format!("{:.3}", duration)));
        }
        if let Some(mode) = update.mode {
            set(self, MODE, AttributeValue::S(mode.to_string()));
        }
        if let Some(owner) = &update.lease_owner {
            set(self, LEASE_OWNER, AttributeValue::S(owner.clone()));
        }
        if let Some(at) = update.lease_expires_at {
            set(self, LEASE_EXPIRES_AT, AttributeValue::S(timestamp(at)));
        }

        format!("SET {}", sets.join(", "))
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accepts RFC 3339 and the zone-less ISO form some producers write.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

pub(crate) fn job_to_item(job: &Job) -> Item {
    let mut item = Item::new();
    let mut s = |k: &str, v: &str| {
        item.insert(k.to_string(), AttributeValue::S(v.to_string()));
    };
    s(JOB_ID, job.id.as_str());
    s(INPUT_KEY, &job.input_key);
    s(NAME, &job.name);
    s(OUTPUT_FORMAT, &job.params.output_format);
    s(RESOLUTION, &job.params.resolution);
    s(VIDEO_CODEC, &job.params.video_codec);
    s(STATUS, job.status.as_str());
    s(CREATED_AT, &timestamp(job.created_at));
    if let Some(key) = &job.output_key {
        s(OUTPUT_KEY, key);
    }
    if let Some(key) = &job.hls_output_key {
        s(HLS_OUTPUT_KEY, key);
    }
    if let Some(mode) = job.mode {
        s(MODE, mode.as_str());
    }
    if let Some(owner) = &job.lease_owner {
        s(LEASE_OWNER, owner);
    }
    if let Some(at) = job.lease_expires_at {
        s(LEASE_EXPIRES_AT, &timestamp(at));
    }
    if let Some(duration) = job.duration_seconds {
        item.insert(
            DURATION_SECONDS.to_string(),
            AttributeValue::N(format!("{:.3}", duration)),
        );
    }
    item
}

pub(crate) fn job_from_item(item: &Item, defaults: &TranscodeParams) -> RepositoryResult<Job> {
    let string = |k: &str| item.get(k).and_then(|v| v.as_s().ok()).cloned();

    let id = string(JOB_ID).ok_or_else(|| RepositoryError::malformed("?", "missing JobId"))?;
    let input_key =
        string(INPUT_KEY).ok_or_else(|| RepositoryError::malformed(&id, "missing InputKey"))?;
    let status = string(STATUS)
        .ok_or_else(|| RepositoryError::malformed(&id, "missing Status"))?
        .parse::<JobStatus>()
        .map_err(|e| RepositoryError::malformed(&id, e))?;
    let mode = match string(MODE) {
        Some(raw) => Some(
            raw.parse::<Mode>()
                .map_err(|e| RepositoryError::malformed(&id, e))?,
        ),
        None => None,
    };
    let duration_seconds = match item.get(DURATION_SECONDS).and_then(|v| v.as_n().ok()) {
        Some(raw) => Some(raw.parse::<f64>().map_err(|_| {
            RepositoryError::malformed(&id, format!("bad DurationSeconds: {}", raw))
        })?),
        None => None,
    };

    Ok(Job {
        name: string(NAME).unwrap_or_else(|| display_name(&input_key)),
        params: TranscodeParams {
            output_format: string(OUTPUT_FORMAT).unwrap_or_else(|| defaults.output_format.clone()),
            resolution: string(RESOLUTION).unwrap_or_else(|| defaults.resolution.clone()),
            video_codec: string(VIDEO_CODEC).unwrap_or_else(|| defaults.video_codec.clone()),
        },
        status,
        output_key: string(OUTPUT_KEY),
        hls_output_key: string(HLS_OUTPUT_KEY),
        duration_seconds,
        mode,
        created_at: string(CREATED_AT)
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(DateTime::UNIX_EPOCH),
        lease_owner: string(LEASE_OWNER),
        lease_expires_at: string(LEASE_EXPIRES_AT).as_deref().and_then(parse_timestamp),
        id: JobId::from(id),
        input_key,
    })
}
