use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One prize of the Nobel prize dataset, linked to the dataset it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NobelPrize {
    #[serde(default)]
    pub data_set_id: Option<Uuid>,
    pub category: String,
    pub year: String,
    #[serde(default)]
    pub overall_motivation: Option<String>,
    #[serde(default)]
    pub laureates: Vec<Laureate>,
}

impl NobelPrize {
    pub fn with_data_set_id(mut self, data_set_id: Uuid) -> Self {
        self.data_set_id = Some(data_set_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Laureate {
    pub id: String,
    pub firstname: String,
    #[serde(default)]
    pub surname: String,
    #[serde(default)]
    pub motivation: String,
    pub share: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_dataset_entries_and_ignores_extra_fields() {
        let raw = json!({
            "year": "1901",
            "category": "chemistry",
            "laureates": [{
                "id": "160",
                "firstname": "Jacobus H.",
                "surname": "van 't Hoff",
                "motivation": "\"in recognition of the extraordinary services\"",
                "share": "1",
                "portrait": "ignored"
            }]
        });
        let prize: NobelPrize = serde_json::from_value(raw).expect("prize decodes");
        assert_eq!(prize.category, "chemistry");
        assert_eq!(prize.laureates[0].surname, "van 't Hoff");
        assert!(prize.data_set_id.is_none());

        let id = Uuid::nil();
        let encoded = serde_json::to_value(prize.with_data_set_id(id)).expect("encode");
        assert_eq!(encoded["dataSetId"], json!(id.to_string()));
        assert_eq!(encoded["overallMotivation"], json!(null));
    }

    #[test]
    fn laureate_surname_is_optional() {
        let laureate: Laureate = serde_json::from_value(json!({
            "id": "467",
            "firstname": "Institute of International Law",
            "share": "1"
        }))
        .expect("laureate decodes");
        assert_eq!(laureate.surname, "");
        assert_eq!(laureate.motivation, "");
    }
}
