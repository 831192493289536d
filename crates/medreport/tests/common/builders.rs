//! Builders for creating test patients programmatically.

#![allow(dead_code)]

use medreport::records::PatientRecord;

/// Builder for `PatientRecord` instances.
pub struct PatientBuilder {
    id: String,
    name: String,
    age: u32,
    email: String,
    medical_history: String,
    symptoms: String,
}

impl PatientBuilder {
    /// A patient with valid defaults; the email is derived from the id.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("Patient {}", id),
            age: 45,
            email: format!("{}@example.com", id.to_lowercase()),
            medical_history: "Type 2 diabetes, managed with metformin.".to_string(),
            symptoms: "Fatigue and increased thirst over the past month.".to_string(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn age(mut self, age: u32) -> Self {
        self.age = age;
        self
    }

    pub fn email(mut self, email: &str) -> Self {
        self.email = email.to_string();
        self
    }

    pub fn medical_history(mut self, history: &str) -> Self {
        self.medical_history = history.to_string();
        self
    }

    pub fn symptoms(mut self, symptoms: &str) -> Self {
        self.symptoms = symptoms.to_string();
        self
    }

    pub fn build(self) -> PatientRecord {
        PatientRecord::new(
            &self.id,
            &self.name,
            self.age,
            &self.email,
            &self.medical_history,
            &self.symptoms,
        )
    }
}

/// A valid patient with defaults.
pub fn patient(id: &str) -> PatientRecord {
    PatientBuilder::new(id).build()
}

/// Patient ids as owned strings.
pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
