use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classroom descriptor joined onto each progress row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassroomRef {
    pub id: Uuid,
    pub name: String,
    pub school_id: Uuid,
    pub subject: Option<String>,
    pub grade_level: Option<String>,
}

/// One submitted assignment. `classroom` is `None` when the referenced
/// classroom no longer resolves.
#[derive(Debug, Clone)]
pub struct ProgressRecord {
    pub classroom_id: Uuid,
    pub score: f64,
    pub assignment_name: String,
    pub date_submitted: DateTime<Utc>,
    pub classroom: Option<ClassroomRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassroomAggregate {
    pub classroom_id: Uuid,
    pub classroom_name: String,
    pub school_id: Uuid,
    pub subject: Option<String>,
    pub grade_level: Option<String>,
    pub average_score: f64,
    pub median_score: f64,
    pub min_score: f64,
    pub max_score: f64,
    pub assignment_count: usize,
    pub calculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Student,
    Teacher,
    HeadTeacher,
}

impl UserRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "student" => Some(UserRole::Student),
            "teacher" => Some(UserRole::Teacher),
            "head_teacher" => Some(UserRole::HeadTeacher),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Student => "student",
            UserRole::Teacher => "teacher",
            UserRole::HeadTeacher => "head_teacher",
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, UserRole::Teacher | UserRole::HeadTeacher)
    }
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub role: Option<UserRole>,
    pub school_id: Option<Uuid>,
}

/// What an authorized caller is allowed to touch.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub user_id: Uuid,
    pub role: UserRole,
    pub school_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressFilter {
    Classroom(Uuid),
    School(Uuid),
}

/// JSON body of the recompute trigger. Ids arrive as strings and may be
/// blank or null.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecomputeRequest {
    #[serde(default)]
    pub classroom_id: Option<String>,
    #[serde(default)]
    pub school_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecomputeOutcome {
    pub aggregates: Vec<ClassroomAggregate>,
    pub persisted: usize,
}

#[derive(Debug, Serialize)]
pub struct RecomputeResponse {
    pub success: bool,
    pub message: String,
    pub data: Vec<ClassroomAggregate>,
}

impl From<RecomputeOutcome> for RecomputeResponse {
    fn from(outcome: RecomputeOutcome) -> Self {
        Self {
            success: true,
            message: format!(
                "Calculated averages for {} classrooms",
                outcome.aggregates.len()
            ),
            data: outcome.aggregates,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubjectSummary {
    pub subject: String,
    pub classroom_count: usize,
    pub avg_score: f64,
}
