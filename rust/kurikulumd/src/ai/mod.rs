//! Boundary to the generative-language service.
//!
//! A [`Generator`] turns a task plus a JSON input into raw JSON. Everything
//! it returns goes through [`validate`] before the core sees it, so a
//! malformed answer surfaces as `Error::InvalidResponse` naming the field.

mod fixture;
mod gemini;
pub mod validate;

use crate::error::{Error, Result};
use crate::model::{Assessment, Kktp, LessonPlan, MaterialKind, StepDecision, TeachingUnit};
use crate::reconcile::ObjectiveDraft;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;

pub use fixture::FixtureGenerator;
pub use gemini::GeminiGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Objectives,
    Rubric,
    Diagnostic,
    LessonPlan,
    AdaptiveStep,
    AtpOrder,
    Units,
    Material,
}

impl Task {
    pub fn as_str(self) -> &'static str {
        match self {
            Task::Objectives => "objectives",
            Task::Rubric => "rubric",
            Task::Diagnostic => "diagnostic",
            Task::LessonPlan => "lessonPlan",
            Task::AdaptiveStep => "adaptiveStep",
            Task::AtpOrder => "atpOrder",
            Task::Units => "units",
            Task::Material => "material",
        }
    }
}

/// One attempt per call; no retry.
pub trait Generator: Send + Sync {
    fn generate(&self, task: Task, input: &Value) -> Result<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    Fixture,
}

impl Provider {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gemini" => Some(Self::Gemini),
            "fixture" => Some(Self::Fixture),
            _ => None,
        }
    }
}

/// Resolved `setup.ai` section.
#[derive(Debug, Clone)]
pub struct AiSetup {
    pub provider: Provider,
    pub model: String,
    pub endpoint: String,
    pub timeout_secs: u64,
    pub user_id: String,
    pub fixtures: Value,
}

pub fn build(conn: &Connection, setup: &AiSetup) -> Result<Box<dyn Generator>> {
    match setup.provider {
        Provider::Fixture => Ok(Box::new(FixtureGenerator::new(setup.fixtures.clone()))),
        Provider::Gemini => {
            let Some(key) = crate::store::api_key_get(conn, &setup.user_id)? else {
                return Err(Error::Generator(format!(
                    "no API key stored for user {}",
                    setup.user_id
                )));
            };
            Ok(Box::new(GeminiGenerator::new(
                &setup.endpoint,
                &setup.model,
                key,
                setup.timeout_secs,
            )?))
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub subject: String,
    pub grade: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectiveBrief {
    pub id: String,
    pub description: String,
    pub competencies: Vec<String>,
    pub kktp: Option<Kktp>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentBrief {
    pub id: String,
    pub name: String,
    /// Only rows for the objective in question.
    pub assessments: Vec<Assessment>,
}

/// How the class finished the objective taught before this one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectiveCompletion {
    pub tp_id: String,
    pub description: String,
    pub completed: Vec<String>,
    pub not_completed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectivesRequest {
    pub course: Course,
    pub context: Option<String>,
    pub existing: Vec<ObjectiveBrief>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricRequest {
    pub course: Course,
    pub objective: ObjectiveBrief,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticRequest {
    pub course: Course,
    pub objective: ObjectiveBrief,
    pub students: Vec<StudentBrief>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub course: Course,
    pub objective: ObjectiveBrief,
    pub students: Vec<StudentBrief>,
    pub summary: String,
    pub time_allocation_minutes: u32,
    pub pertemuan: u32,
    pub previous_completion: Option<ObjectiveCompletion>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveRequest {
    pub course: Course,
    pub objective: ObjectiveBrief,
    pub students: Vec<StudentBrief>,
    pub latest_plan: LessonPlan,
    pub time_allocation_minutes: u32,
    pub pertemuan: u32,
    pub next_objective: Option<ObjectiveBrief>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceRequest {
    pub course: Course,
    pub objectives: Vec<ObjectiveBrief>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialRequest {
    pub course: Course,
    pub objective: ObjectiveBrief,
    pub plan: LessonPlan,
    pub kind: MaterialKind,
}

/// Typed front of a generator: serializes the request, calls once,
/// validates the answer.
#[derive(Clone, Copy)]
pub struct Assistant<'a> {
    generator: &'a dyn Generator,
}

impl<'a> Assistant<'a> {
    pub fn new(generator: &'a dyn Generator) -> Self {
        Assistant { generator }
    }

    fn call<T: Serialize>(&self, task: Task, req: &T) -> Result<Value> {
        let input = serde_json::to_value(req)?;
        tracing::debug!(task = task.as_str(), "generator call");
        self.generator.generate(task, &input).map_err(|e| {
            tracing::warn!(task = task.as_str(), error = %e, "generator call failed");
            e
        })
    }

    pub fn objectives(&self, req: &ObjectivesRequest) -> Result<Vec<ObjectiveDraft>> {
        validate::objectives(&self.call(Task::Objectives, req)?)
    }

    pub fn rubric(&self, req: &RubricRequest) -> Result<Kktp> {
        validate::rubric(&self.call(Task::Rubric, req)?)
    }

    pub fn diagnostic(&self, req: &DiagnosticRequest) -> Result<String> {
        validate::diagnostic(&self.call(Task::Diagnostic, req)?)
    }

    pub fn lesson_plan(&self, req: &PlanRequest) -> Result<LessonPlan> {
        validate::lesson_plan(&self.call(Task::LessonPlan, req)?, "$", req.pertemuan)
    }

    pub fn adaptive_step(&self, req: &AdaptiveRequest) -> Result<(StepDecision, String)> {
        validate::adaptive_step(&self.call(Task::AdaptiveStep, req)?, req.pertemuan)
    }

    pub fn atp_order(&self, req: &SequenceRequest) -> Result<Vec<String>> {
        let known: Vec<&str> = req.objectives.iter().map(|o| o.id.as_str()).collect();
        validate::atp_order(&self.call(Task::AtpOrder, req)?, &known)
    }

    pub fn units(&self, req: &SequenceRequest) -> Result<Vec<TeachingUnit>> {
        let known: Vec<&str> = req.objectives.iter().map(|o| o.id.as_str()).collect();
        validate::units(&self.call(Task::Units, req)?, &known)
    }

    pub fn material(&self, req: &MaterialRequest) -> Result<String> {
        validate::material(&self.call(Task::Material, req)?)
    }
}
