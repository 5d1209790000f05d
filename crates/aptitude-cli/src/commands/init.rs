//! The `aptitude init` command.

use std::path::Path;

use anyhow::Result;

pub fn execute() -> Result<()> {
    if Path::new("aptitude.toml").exists() {
        println!("aptitude.toml already exists, skipping.");
    } else {
        std::fs::write("aptitude.toml", SAMPLE_CONFIG)?;
        println!("Created aptitude.toml");
    }

    std::fs::create_dir_all("data")?;
    let fixture_path = Path::new("data/fixture.json");
    if fixture_path.exists() {
        println!("data/fixture.json already exists, skipping.");
    } else {
        std::fs::write(fixture_path, SAMPLE_FIXTURE)?;
        println!("Created data/fixture.json");
    }

    println!("\nNext steps:");
    println!("  1. Run: aptitude summarize --subject s-001");
    println!("  2. Run: aptitude audit --subject s-002");
    println!("  3. Run: aptitude batch --all --output reports");
    println!("  4. Point [data] at your data service (backend = \"rest\") when ready");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# aptitude configuration

[data]
backend = "memory"
fixture = "data/fixture.json"

# [data]
# backend = "rest"
# base_url = "${APTITUDE_DATA_URL}"
# api_key = "${APTITUDE_API_KEY}"
# timeout_secs = 30

[cache]
ttl_secs = 300

[batch]
delay_ms = 100
include_interpretations = true
report_title = "Aptitude report"
"#;

const SAMPLE_FIXTURE: &str = r#"{
  "subjects": [
    {"id": "s-001", "name": "Lucia", "surname": "Fernandez", "external_id": "40123456", "gender": "female", "birth_date": "2008-03-14", "institution": "North School"},
    {"id": "s-002", "name": "Mateo", "surname": "Gomez", "external_id": "40234567", "gender": "male", "birth_date": "2007-11-02", "institution": "North School"},
    {"id": "s-003", "name": "Valentina", "surname": "Ruiz", "external_id": "40345678", "gender": "female", "birth_date": "2008-06-21", "institution": "South School"},
    {"id": "s-004", "name": "Tomas", "surname": "Diaz", "external_id": null, "gender": "male", "birth_date": "2009-01-30", "institution": "South School"}
  ],
  "subject_identities": [
    {"subject_id": "s-004", "external_id": "tdiaz.2024"}
  ],
  "results": [
    {"subject_id": "s-001", "aptitude_code": "V", "raw_score": 32, "correct_count": 32, "incorrect_count": 4, "omitted_count": 4, "elapsed_seconds": 720, "percentile": 85, "timestamp": "2024-05-10T09:00:00Z"},
    {"subject_id": "s-001", "aptitude_code": "E", "raw_score": 28, "correct_count": 28, "incorrect_count": 8, "omitted_count": 4, "elapsed_seconds": 600, "percentile": 70, "timestamp": "2024-05-10T09:15:00Z"},
    {"subject_id": "s-001", "aptitude_code": "A", "raw_score": 45, "correct_count": 45, "incorrect_count": 3, "omitted_count": 2, "elapsed_seconds": 300, "percentile": 60, "timestamp": "2024-05-10T09:30:00Z"},
    {"subject_id": "s-001", "aptitude_code": "CON", "raw_score": 40, "correct_count": 40, "incorrect_count": 5, "omitted_count": 5, "elapsed_seconds": 300, "percentile": 55, "timestamp": "2024-05-10T09:40:00Z"},
    {"subject_id": "s-001", "aptitude_code": "R", "raw_score": 25, "correct_count": 25, "incorrect_count": 10, "omitted_count": 5, "elapsed_seconds": 900, "percentile": 75, "timestamp": "2024-05-10T10:00:00Z"},
    {"subject_id": "s-001", "aptitude_code": "N", "raw_score": 20, "correct_count": 20, "incorrect_count": 12, "omitted_count": 8, "elapsed_seconds": 900, "percentile": 65, "timestamp": "2024-05-10T10:20:00Z"},
    {"subject_id": "s-002", "aptitude_code": "V", "raw_score": 18, "correct_count": 18, "incorrect_count": 14, "omitted_count": 8, "elapsed_seconds": 720, "percentile": 30, "timestamp": "2024-05-11T09:00:00Z"},
    {"subject_id": "s-002", "aptitude_code": "R", "raw_score": 15, "correct_count": 15, "incorrect_count": 15, "omitted_count": 10, "elapsed_seconds": 900, "percentile": 25, "timestamp": "2024-05-11T09:20:00Z"},
    {"subject_id": "s-002", "aptitude_code": "N", "raw_score": 22, "correct_count": 22, "incorrect_count": 10, "omitted_count": 8, "elapsed_seconds": 900, "percentile": 70, "timestamp": "2024-05-11T09:40:00Z"},
    {"subject_id": "s-002", "aptitude_code": "M", "raw_score": 30, "correct_count": 30, "incorrect_count": 6, "omitted_count": 4, "elapsed_seconds": 600, "percentile": 90, "timestamp": "2024-05-11T10:00:00Z"},
    {"subject_id": "s-003", "aptitude_code": "V", "raw_score": 35, "correct_count": 35, "incorrect_count": 3, "omitted_count": 2, "elapsed_seconds": 720, "percentile": 95, "timestamp": "2024-05-12T09:00:00Z"},
    {"subject_id": "s-003", "aptitude_code": "E", "raw_score": 20, "correct_count": 20, "incorrect_count": 12, "omitted_count": 8, "elapsed_seconds": 600, "percentile": 35, "timestamp": "2024-05-12T09:15:00Z"},
    {"subject_id": "s-003", "aptitude_code": "R", "raw_score": 30, "correct_count": 30, "incorrect_count": 6, "omitted_count": 4, "elapsed_seconds": 900, "percentile": 85, "timestamp": "2024-05-12T09:35:00Z"}
  ],
  "interpretations": [
    {"aptitude_code": "V", "text": "Understanding and use of verbal concepts."},
    {"aptitude_code": "E", "text": "Mental manipulation of shapes in space."},
    {"aptitude_code": "A", "text": "Sustained selective attention under time pressure."},
    {"aptitude_code": "CON", "text": "Accuracy maintained across repetitive tasks."},
    {"aptitude_code": "R", "text": "Abstract reasoning and rule induction."},
    {"aptitude_code": "N", "text": "Numerical reasoning and calculation."}
  ],
  "reports": []
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_config_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aptitude.toml");
        std::fs::write(&path, SAMPLE_CONFIG).unwrap();

        let config = aptitude_store::load_config_from(Some(&path)).unwrap();
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.batch.report_title, "Aptitude report");
    }

    #[test]
    fn sample_fixture_loads() {
        let store = aptitude_store::MemoryDataService::from_fixture_str(SAMPLE_FIXTURE).unwrap();
        let fixture = store.to_fixture();
        assert_eq!(fixture["subjects"].as_array().unwrap().len(), 4);
        assert_eq!(fixture["results"].as_array().unwrap().len(), 13);
    }
}
