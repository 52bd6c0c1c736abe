use serde::Deserialize;

use crate::error::{LarderError, Result};
use crate::models::{Nutrients, Product};

/// Body of the shared-catalog endpoint: either a bare array or `{ "data": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SharedResponse {
    List(Vec<SharedProduct>),
    Wrapped { data: Vec<SharedProduct> },
}

impl SharedResponse {
    #[must_use]
    fn into_products(self) -> Vec<SharedProduct> {
        match self {
            SharedResponse::List(list) | SharedResponse::Wrapped { data: list } => list,
        }
    }
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)]
pub struct SharedProduct {
    pub id: Option<String>,
    pub name: Option<String>,
    pub fingerprint: Option<String>,
    pub category: Option<String>,
    pub kcal100: Option<f64>,
    pub protein100: Option<f64>,
    pub fat100: Option<f64>,
    pub carbs100: Option<f64>,
    pub simple100: Option<f64>,
    pub complex100: Option<f64>,
    #[serde(rename = "badFat100")]
    pub bad_fat100: Option<f64>,
    #[serde(rename = "goodFat100")]
    pub good_fat100: Option<f64>,
    pub trans100: Option<f64>,
    pub fiber100: Option<f64>,
    pub sodium100: Option<f64>,
    pub gi: Option<f64>,
    pub harm: Option<f64>,
}

/// Convert a shared-catalog row. Rows without an id or a name are unusable.
#[must_use]
fn shared_to_product(p: SharedProduct) -> Option<Product> {
    let id = p.id.filter(|i| !i.is_empty())?;
    let name = p.name.filter(|n| !n.trim().is_empty())?;

    Some(Product {
        id,
        name,
        fingerprint: p.fingerprint.filter(|f| !f.is_empty()),
        nutrients: Nutrients {
            kcal: p.kcal100,
            protein: p.protein100,
            carbs: p.carbs100,
            fat: p.fat100,
            simple_carbs: p.simple100,
            complex_carbs: p.complex100,
            bad_fat: p.bad_fat100,
            good_fat: p.good_fat100,
            trans_fat: p.trans100,
            fiber: p.fiber100,
            sodium: p.sodium100,
            gi: p.gi,
            harm: p.harm,
        },
        shared_origin_id: None,
        recovered_from: None,
        recovered_at: None,
    })
}

/// Parse a response body into products, dropping unusable rows.
pub fn parse_shared_catalog(body: &str) -> Result<Vec<Product>> {
    let response: SharedResponse = serde_json::from_str(body)
        .map_err(|e| LarderError::Remote(format!("unexpected response body: {e}")))?;
    Ok(response
        .into_products()
        .into_iter()
        .filter_map(shared_to_product)
        .collect())
}
