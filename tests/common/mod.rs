//! Shared test utilities: a recording stub repository and FHIR fixtures

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use fhirgate_mcp::fhir::{FhirRepository, RepoError};
use fhirgate_mcp::tools::FhirContext;

/// One recorded repository primitive invocation
#[derive(Debug, Clone, PartialEq)]
pub enum RepoCall {
    Create(String),
    Read(String, String),
    Update(String, String),
    Search(String, String),
}

/// In-memory repository that records every call
///
/// `create` assigns sequential ids; `read`/`update` operate on the seeded
/// resource map. Validation-path tests assert the call log stays empty.
pub struct StubRepo {
    pub calls: Mutex<Vec<RepoCall>>,
    resources: Mutex<HashMap<(String, String), Value>>,
    next_id: Mutex<u64>,
}

impl StubRepo {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            resources: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
        }
    }

    pub async fn seed(&self, resource: Value) {
        let resource_type = resource["resourceType"].as_str().unwrap().to_string();
        let id = resource["id"].as_str().unwrap().to_string();
        self.resources
            .lock()
            .await
            .insert((resource_type, id), resource);
    }

    pub async fn calls(&self) -> Vec<RepoCall> {
        self.calls.lock().await.clone()
    }

    pub async fn stored(&self, resource_type: &str, id: &str) -> Option<Value> {
        self.resources
            .lock()
            .await
            .get(&(resource_type.to_string(), id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl FhirRepository for StubRepo {
    async fn create(&self, mut resource: Value) -> Result<Value, RepoError> {
        let resource_type = resource["resourceType"]
            .as_str()
            .expect("created resource must carry resourceType")
            .to_string();
        self.calls
            .lock()
            .await
            .push(RepoCall::Create(resource_type.clone()));
        let mut next_id = self.next_id.lock().await;
        let id = format!("{}-{}", resource_type.to_lowercase(), *next_id);
        *next_id += 1;
        resource["id"] = json!(id);
        self.resources
            .lock()
            .await
            .insert((resource_type, id), resource.clone());
        Ok(resource)
    }

    async fn read(&self, resource_type: &str, id: &str) -> Result<Option<Value>, RepoError> {
        self.calls
            .lock()
            .await
            .push(RepoCall::Read(resource_type.to_string(), id.to_string()));
        Ok(self.stored(resource_type, id).await)
    }

    async fn update(&self, resource: Value) -> Result<Value, RepoError> {
        let resource_type = resource["resourceType"].as_str().unwrap().to_string();
        let id = resource["id"].as_str().unwrap().to_string();
        self.calls
            .lock()
            .await
            .push(RepoCall::Update(resource_type.clone(), id.clone()));
        self.resources
            .lock()
            .await
            .insert((resource_type, id), resource.clone());
        Ok(resource)
    }

    async fn search(&self, resource_type: &str, query: &str) -> Result<Vec<Value>, RepoError> {
        self.calls.lock().await.push(RepoCall::Search(
            resource_type.to_string(),
            query.to_string(),
        ));
        // Matching is not modeled; return everything of the type
        Ok(self
            .resources
            .lock()
            .await
            .iter()
            .filter(|((t, _), _)| t == resource_type)
            .map(|(_, r)| r.clone())
            .collect())
    }
}

/// Stub plus the context handlers expect
pub fn stub_context() -> (Arc<StubRepo>, FhirContext) {
    let repo = Arc::new(StubRepo::new());
    let ctx = FhirContext::new(repo.clone());
    (repo, ctx)
}

pub fn test_patient(id: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "name": [{"use": "official", "family": "Doe", "given": ["John", "Michael"]}],
        "gender": "male",
        "birthDate": "1980-01-01"
    })
}

pub fn test_observation(id: &str, patient_id: &str) -> Value {
    json!({
        "resourceType": "Observation",
        "id": id,
        "status": "final",
        "code": {
            "coding": [{
                "system": "http://loinc.org",
                "code": "8310-5",
                "display": "Body temperature"
            }]
        },
        "subject": {"reference": format!("Patient/{patient_id}")},
        "encounter": {"reference": "Encounter/enc-1"},
        "valueQuantity": {
            "value": 36.5,
            "unit": "Cel",
            "system": "http://unitsofmeasure.org",
            "code": "Cel"
        }
    })
}
