//! Aggregation scans over the care records. Both run entirely inside Mongo;
//! the backend only shapes the pipeline and renders the result.

use futures::TryStreamExt;
use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, store::Store, utils::format_date};

/// A resident whose last four nursing notes all record absent intestinal
/// elimination.
#[derive(Debug, Deserialize)]
pub struct AbsentElimination {
    pub name: String,
    #[serde(rename = "lastNotes")]
    pub last_notes: Vec<DateTime>,
}

/// Active residents with four consecutive absent-elimination notes, with the
/// dates of those notes.
pub async fn absent_elimination(store: &Store) -> Result<Vec<AbsentElimination>, AppError> {
    let pipeline = vec![
        doc! {"$match": {"isActive": "S"}},
        doc! {"$lookup": {
            "from": "nursing_notes",
            "let": {"rid": {"$toString": "$_id"}},
            "pipeline": [
                {"$match": {"$expr": {"$eq": ["$residentId", "$$rid"]}}},
                {"$sort": {"createdAt": -1}},
                {"$limit": 4},
            ],
            "as": "lastNotes",
        }},
        doc! {"$match": {"$expr": {"$and": [
            {"$eq": [{"$size": "$lastNotes"}, 4]},
            {"$allElementsTrue": {"$map": {
                "input": "$lastNotes.intestinalElimination",
                "as": "status",
                "in": {"$eq": ["$$status", "Absent"]},
            }}},
        ]}}},
        doc! {"$project": {
            "name": 1,
            "lastNotes": {"$map": {
                "input": "$lastNotes",
                "as": "note",
                "in": "$$note.createdAt",
            }},
        }},
    ];

    let cursor = store
        .db
        .collection::<Document>("residents")
        .aggregate(pipeline)
        .with_type::<AbsentElimination>()
        .await?;

    Ok(cursor.try_collect().await?)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleResident {
    pub id: String,
    pub name: String,
    // legacy rows can leave these null after the date conversion
    pub last_evolution: Option<DateTime>,
    pub days_since: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AreaReport {
    pub area: String,
    pub residents: Vec<StaleResident>,
}

/// Active residents whose most recent evolution note per professional area is
/// older than seven days, grouped by area. Caretaker and nursing-tech areas
/// write daily notes elsewhere and are excluded from this alert.
pub async fn stale_evolutions(store: &Store) -> Result<Vec<AreaReport>, AppError> {
    let pipeline = vec![
        doc! {"$match": {"$or": [{"isActive": "S"}, {"isActive": true}]}},
        doc! {"$addFields": {"ridStr": {"$toString": "$_id"}}},
        // evolutions store residentId as a string, hence the $toString above
        doc! {"$lookup": {
            "from": "evolutions",
            "let": {"rid": "$ridStr"},
            "pipeline": [
                {"$match": {"$expr": {"$and": [
                    {"$eq": ["$residentId", "$$rid"]},
                    {"$eq": ["$category", "Evolution"]},
                ]}}},
                // legacy rows carry the date as a string
                {"$addFields": {"noteDate": {"$cond": [
                    {"$eq": [{"$type": "$date"}, "date"]},
                    "$date",
                    {"$convert": {"input": "$date", "to": "date", "onError": null, "onNull": null}},
                ]}}},
                {"$group": {"_id": "$area", "lastEvolution": {"$max": "$noteDate"}}},
            ],
            "as": "areas",
        }},
        doc! {"$unwind": {"path": "$areas", "preserveNullAndEmptyArrays": false}},
        doc! {"$addFields": {
            "cutoff": {"$dateSubtract": {"startDate": "$$NOW", "unit": "day", "amount": 7}},
            "lastEvolution": "$areas.lastEvolution",
            "area": "$areas._id",
        }},
        doc! {"$match": {"$expr": {"$lt": ["$lastEvolution", "$cutoff"]}}},
        doc! {"$match": {"area": {"$nin": [
            "Caretaker",
            "Nursing Technician",
            "Technical Supervisor",
        ]}}},
        doc! {"$addFields": {
            "daysSince": {"$dateDiff": {"startDate": "$lastEvolution", "endDate": "$$NOW", "unit": "day"}},
            "sortKey": {"$toUpper": "$name"},
        }},
        doc! {"$sort": {"area": 1, "sortKey": 1}},
        doc! {"$group": {"_id": "$area", "residents": {"$push": {
            "id": "$ridStr",
            "name": "$name",
            "lastEvolution": "$lastEvolution",
            "daysSince": "$daysSince",
        }}}},
        doc! {"$project": {"_id": 0, "area": "$_id", "residents": 1}},
        doc! {"$sort": {"area": 1}},
    ];

    let cursor = store
        .db
        .collection::<Document>("residents")
        .aggregate(pipeline)
        .with_type::<AreaReport>()
        .await?;

    Ok(cursor.try_collect().await?)
}

/// WhatsApp alert body for the morning absent-elimination scan.
pub fn absent_alert_text(results: &[AbsentElimination]) -> String {
    let lines = results
        .iter()
        .map(|r| {
            let dates = r
                .last_notes
                .iter()
                .map(|d| format!("  • {}", format_date(*d)))
                .collect::<Vec<_>>()
                .join("\n");

            format!("👵 {}:\n{}", r.name, dates)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    [
        "🤖 *Health alert*",
        "",
        "These residents have four consecutive notes with",
        "*absent intestinal elimination*:",
        "",
        &lines,
        "",
        "Please check on each of them.",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use mongodb::bson::DateTime;

    use super::{AbsentElimination, absent_alert_text};

    #[test]
    fn alert_lists_each_resident_with_note_dates() {
        let results = vec![
            AbsentElimination {
                name: "Maria Santos".to_string(),
                last_notes: vec![
                    DateTime::from_millis(1_719_835_200_000),
                    DateTime::from_millis(1_719_748_800_000),
                ],
            },
            AbsentElimination {
                name: "Ayrton".to_string(),
                last_notes: vec![DateTime::from_millis(1_719_835_200_000)],
            },
        ];

        let text = absent_alert_text(&results);

        assert!(text.starts_with("🤖 *Health alert*"));
        assert!(text.contains("👵 Maria Santos:"));
        assert!(text.contains("  • 01/07/2024"));
        assert!(text.contains("👵 Ayrton:"));
    }
}
