//! Records persisted by the daemon and exchanged with the host.
//!
//! Field names serialize in camelCase so exported documents match what the
//! planner UI reads and writes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Meeting number used for backfilled results of objectives taught before
/// assessment started.
pub const SYNC_MEETING: u32 = 0;

/// Highest meeting number a plan or a recorded result may use.
pub const MAX_MEETING: u32 = 999;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPlan {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub class_id: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub grade: String,
    #[serde(default)]
    pub curriculum: CurriculumData,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumData {
    /// Objectives in ATP (flow) order.
    #[serde(default)]
    pub objectives: Vec<LearningObjective>,
    #[serde(default)]
    pub units: Vec<TeachingUnit>,
}

impl CurriculumData {
    pub fn objective(&self, tp_id: &str) -> Option<&LearningObjective> {
        self.objectives.iter().find(|o| o.id == tp_id)
    }

    pub fn objective_mut(&mut self, tp_id: &str) -> Option<&mut LearningObjective> {
        self.objectives.iter_mut().find(|o| o.id == tp_id)
    }

    pub fn objective_ids(&self) -> Vec<String> {
        self.objectives.iter().map(|o| o.id.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeachingUnit {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub objective_ids: Vec<String>,
    #[serde(default)]
    pub meetings: u32,
}

/// Tujuan Pembelajaran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningObjective {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub competencies: Vec<String>,
    #[serde(default)]
    pub dpl_dimensions: Vec<String>,
    #[serde(default)]
    pub kktp: Option<Kktp>,
    #[serde(default)]
    pub diagnostic_data: Option<DiagnosticData>,
    #[serde(default)]
    pub adaptive_steps: Vec<AdaptiveLessonStep>,
    #[serde(default)]
    pub planned_sessions: Vec<PlannedSession>,
}

impl LearningObjective {
    pub fn new(id: String, description: String) -> Self {
        LearningObjective {
            id,
            description,
            competencies: Vec::new(),
            dpl_dimensions: Vec::new(),
            kktp: None,
            diagnostic_data: None,
            adaptive_steps: Vec::new(),
            planned_sessions: Vec::new(),
        }
    }

    /// The plan currently in force: the newest intervention plan, else the
    /// diagnostic plan.
    pub fn latest_plan(&self) -> Option<&LessonPlan> {
        self.adaptive_steps
            .iter()
            .rev()
            .find_map(|s| s.plan())
            .or_else(|| self.diagnostic_data.as_ref().and_then(|d| d.plan.as_ref()))
    }

    pub fn plan_for_meeting_mut(&mut self, pertemuan: u32) -> Option<&mut LessonPlan> {
        for step in self.adaptive_steps.iter_mut().rev() {
            if let StepDecision::Intervention { plan } = &mut step.decision {
                if plan.pertemuan_ke == pertemuan {
                    return Some(plan);
                }
            }
        }
        self.diagnostic_data
            .as_mut()
            .and_then(|d| d.plan.as_mut())
            .filter(|p| p.pertemuan_ke == pertemuan)
    }

    /// Every meeting number this objective's plans and schedule refer to.
    pub fn meetings(&self) -> impl Iterator<Item = u32> + '_ {
        let diagnostic = self
            .diagnostic_data
            .as_ref()
            .and_then(|d| d.plan.as_ref())
            .map(|p| p.pertemuan_ke);
        diagnostic
            .into_iter()
            .chain(self.adaptive_steps.iter().filter_map(|s| s.plan().map(|p| p.pertemuan_ke)))
            .chain(self.planned_sessions.iter().map(|p| p.pertemuan))
    }
}

/// KKTP: the achievement rubric of one objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kktp {
    pub aspects: Vec<KktpAspect>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KktpAspect {
    pub aspek: String,
    /// Critical prerequisite for the next objective.
    #[serde(default)]
    pub critical: bool,
    /// Exactly four entries, levels 1..=4 in order.
    pub criteria: Vec<KktpCriterion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KktpCriterion {
    pub level: u8,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticData {
    #[serde(default)]
    pub recommendation: Option<String>,
    /// Per-student group assignment as entered by the teacher.
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub plan: Option<LessonPlan>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MaterialKind {
    Reading,
    Worksheet,
    Game,
    Quiz,
}

impl MaterialKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reading" => Some(Self::Reading),
            "worksheet" => Some(Self::Worksheet),
            "game" => Some(Self::Game),
            "quiz" => Some(Self::Quiz),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reading => "reading",
            Self::Worksheet => "worksheet",
            Self::Game => "game",
            Self::Quiz => "quiz",
        }
    }
}

/// Deep-learning lesson plan for one meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPlan {
    pub pertemuan_ke: u32,
    pub title: String,
    #[serde(default)]
    pub duration_minutes: u32,
    #[serde(default)]
    pub phases: Vec<LessonPhase>,
    /// Generated supplementary HTML, cached per kind.
    #[serde(default)]
    pub materials: BTreeMap<MaterialKind, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPhase {
    pub name: String,
    #[serde(default)]
    pub duration_minutes: u32,
    #[serde(default)]
    pub activities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepDecision {
    Proceed,
    Intervention { plan: LessonPlan },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveLessonStep {
    #[serde(flatten)]
    pub decision: StepDecision,
    #[serde(default)]
    pub rationale: String,
    pub timestamp: i64,
}

impl AdaptiveLessonStep {
    pub fn plan(&self) -> Option<&LessonPlan> {
        match &self.decision {
            StepDecision::Intervention { plan } => Some(plan),
            StepDecision::Proceed => None,
        }
    }

    pub fn is_proceed(&self) -> bool {
        matches!(self.decision, StepDecision::Proceed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedSession {
    pub pertemuan: u32,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub class_id: String,
    pub name: String,
    #[serde(default)]
    pub nis: Option<String>,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub assessments: Vec<Assessment>,
    #[serde(default)]
    pub summatives: Vec<SummativeAssessment>,
    #[serde(default)]
    pub dpl_observations: Vec<DplObservation>,
    #[serde(default)]
    pub hafalan: Vec<HafalanRecord>,
}

/// Formative result for one rubric aspect at one meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub tp_id: String,
    pub aspek: String,
    /// 0 = not assessed, 1..=4 rubric level.
    pub level: u8,
    pub pertemuan: u32,
    pub timestamp: i64,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummativeAssessment {
    pub id: String,
    pub tp_id: String,
    pub title: String,
    pub score: f64,
    #[serde(default)]
    pub date: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DplObservation {
    pub tp_id: String,
    pub dimension: String,
    pub pertemuan: u32,
    pub level: u8,
    #[serde(default)]
    pub note: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HafalanStatus {
    Belum,
    Proses,
    Hafal,
}

impl HafalanStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "belum" => Some(Self::Belum),
            "proses" => Some(Self::Proses),
            "hafal" => Some(Self::Hafal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HafalanRecord {
    pub item_id: String,
    pub status: HafalanStatus,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub academic_year: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttendanceStatus {
    Hadir,
    Sakit,
    Izin,
    Alpa,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 4] = [
        AttendanceStatus::Hadir,
        AttendanceStatus::Sakit,
        AttendanceStatus::Izin,
        AttendanceStatus::Alpa,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hadir" => Some(Self::Hadir),
            "sakit" => Some(Self::Sakit),
            "izin" => Some(Self::Izin),
            "alpa" => Some(Self::Alpa),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hadir => "hadir",
            Self::Sakit => "sakit",
            Self::Izin => "izin",
            Self::Alpa => "alpa",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    /// `${studentId}-${date}`.
    pub id: String,
    pub student_id: String,
    pub class_id: String,
    pub date: String,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub note: Option<String>,
}

impl AttendanceRecord {
    pub fn key(student_id: &str, date: &str) -> String {
        format!("{}-{}", student_id, date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolidayRecord {
    pub date: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
    pub user_id: String,
    pub key: String,
}
