use super::{Generator, Task};
use crate::error::{Error, Result};
use serde_json::{json, Value};
use std::time::Duration;

const USER_AGENT: &str = concat!("kurikulumd/", env!("CARGO_PKG_VERSION"));

/// Client for the generative-language `generateContent` endpoint, asking
/// for a JSON response body.
pub struct GeminiGenerator {
    http: reqwest::blocking::Client,
    url: String,
    api_key: String,
}

impl GeminiGenerator {
    pub fn new(endpoint: &str, model: &str, api_key: String, timeout_secs: u64) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Generator(e.to_string()))?;
        Ok(GeminiGenerator {
            http,
            url: format!(
                "{}/models/{}:generateContent",
                endpoint.trim_end_matches('/'),
                model
            ),
            api_key,
        })
    }
}

fn instructions(task: Task) -> &'static str {
    match task {
        Task::Objectives => {
            "Susun daftar Tujuan Pembelajaran (TP) Kurikulum Merdeka untuk mata pelajaran dan fase berikut. \
             Pertahankan id TP lama bila TP tersebut tetap dipakai. \
             Balas JSON: {\"objectives\":[{\"id\"?:string,\"description\":string,\"competencies\":[string],\"dplDimensions\":[string]}]}"
        }
        Task::Rubric => {
            "Buat KKTP (rubrik) untuk TP berikut. Setiap aspek memiliki tepat empat kriteria level 1-4 \
             dan tandai aspek yang menjadi prasyarat kritis. \
             Balas JSON: {\"aspects\":[{\"aspek\":string,\"critical\":bool,\"criteria\":[{\"level\":1-4,\"description\":string}]}]}"
        }
        Task::Diagnostic => {
            "Rancang asesmen diagnostik awal untuk TP berikut dan berikan rekomendasi pengelompokan siswa. \
             Balas JSON: {\"recommendation\":string}"
        }
        Task::LessonPlan => {
            "Susun rencana pembelajaran mendalam untuk pertemuan yang diminta, berdiferensiasi sesuai ringkasan diagnostik \
             dan data ketuntasan TP sebelumnya. Total durasi tidak melebihi alokasi waktu. \
             Balas JSON: {\"title\":string,\"durationMinutes\":int,\"phases\":[{\"name\":string,\"durationMinutes\":int,\"activities\":[string]}]}"
        }
        Task::AdaptiveStep => {
            "Berdasarkan hasil asesmen formatif terbaru, putuskan apakah kelas lanjut ke TP berikutnya (PROCEED) \
             atau perlu intervensi (INTERVENTION) dengan rencana pertemuan baru. \
             Balas JSON: {\"decision\":\"PROCEED\"|\"INTERVENTION\",\"rationale\":string,\"plan\"?:{\"title\":string,\"durationMinutes\":int,\"phases\":[...]}}"
        }
        Task::AtpOrder => {
            "Urutkan TP berikut menjadi Alur Tujuan Pembelajaran (ATP) yang logis. \
             Sertakan setiap id TP tepat satu kali. \
             Balas JSON: {\"order\":[tpId]}"
        }
        Task::Units => {
            "Kelompokkan TP berikut menjadi unit/bab pembelajaran beserta jumlah pertemuannya. \
             Balas JSON: {\"units\":[{\"title\":string,\"objectiveIds\":[tpId],\"meetings\":int}]}"
        }
        Task::Material => {
            "Buat bahan ajar pendukung berjenis sesuai permintaan untuk rencana pembelajaran berikut dalam HTML sederhana. \
             Balas JSON: {\"html\":string}"
        }
    }
}

impl Generator for GeminiGenerator {
    fn generate(&self, task: Task, input: &Value) -> Result<Value> {
        let prompt = format!(
            "{}\n\nData:\n{}",
            instructions(task),
            serde_json::to_string_pretty(input)?
        );
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json" }
        });

        let resp = self
            .http
            .post(&self.url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .map_err(|e| Error::Generator(e.to_string()))?;
        let status = resp.status();
        let payload: Value = resp
            .json()
            .map_err(|e| Error::Generator(format!("unreadable response: {}", e)))?;
        if !status.is_success() {
            let message = payload
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .unwrap_or("request rejected");
            return Err(Error::Generator(format!("{} ({})", message, status.as_u16())));
        }

        let text = payload
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::invalid_response("candidates[0].content.parts[0].text", "missing")
            })?;
        serde_json::from_str(strip_code_fence(text))
            .map_err(|e| Error::invalid_response("$", format!("not JSON: {}", e)))
    }
}

/// Models sometimes wrap JSON in a markdown fence despite the mime type.
fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
