use std::collections::{BTreeSet, HashMap};

use sha2::{Digest, Sha256};

use crate::models::{Item, Product, ProductRef};

/// Lowercase, trim, collapse whitespace and fold `ё` into `е`.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .replace('ё', "е")
}

/// Cheap change detector over a catalog: `id:kcal` pairs joined by `|`.
#[must_use]
pub fn catalog_signature(products: &[Product]) -> String {
    products
        .iter()
        .map(|p| {
            let id = if p.id.is_empty() { &p.name } else { &p.id };
            format!("{id}:{}", p.nutrients.kcal.unwrap_or(0.0))
        })
        .collect::<Vec<_>>()
        .join("|")
}

#[must_use]
pub fn favorites_signature(favorites: &BTreeSet<String>) -> String {
    // BTreeSet iterates sorted
    favorites.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

fn round1(v: Option<f64>) -> f64 {
    (v.unwrap_or(0.0) * 10.0).round() / 10.0
}

/// SHA-256 hex over the normalized name and rounded nutrients, so two devices
/// derive the same fingerprint for the same product.
#[must_use]
pub fn compute_fingerprint(product: &Product) -> String {
    let name = normalize_name(&product.name);
    let n = &product.nutrients;
    let nutrients = [
        n.simple_carbs,
        n.complex_carbs,
        n.protein,
        n.bad_fat,
        n.good_fat,
        n.trans_fat,
        n.fiber,
        n.gi,
        n.harm,
    ]
    .into_iter()
    .map(|v| round1(v).to_string())
    .collect::<Vec<_>>()
    .join("|");

    let hash = Sha256::digest(format!("{name}::{nutrients}").as_bytes());
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// Read-only lookup view over one catalog snapshot. Rebuild it when
/// [`ProductIndex::is_stale`] reports the catalog changed; never patch it.
#[derive(Debug, Clone, Default)]
pub struct ProductIndex {
    products: Vec<Product>,
    by_id: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
    by_fingerprint: HashMap<String, usize>,
    signature: String,
}

impl ProductIndex {
    #[must_use]
    pub fn build(products: &[Product]) -> Self {
        let mut by_id = HashMap::with_capacity(products.len());
        let mut by_name = HashMap::with_capacity(products.len());
        let mut by_fingerprint = HashMap::new();

        for (i, p) in products.iter().enumerate() {
            if !p.id.is_empty() {
                by_id.insert(p.id.to_lowercase(), i);
            }
            let name = normalize_name(&p.name);
            if !name.is_empty() {
                by_name.insert(name, i);
            }
            if let Some(fp) = p.fingerprint.as_deref().filter(|f| !f.is_empty()) {
                by_fingerprint.insert(fp.to_string(), i);
            }
        }

        Self {
            products: products.to_vec(),
            by_id,
            by_name,
            by_fingerprint,
            signature: catalog_signature(products),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.products.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    #[must_use]
    pub fn products(&self) -> &[Product] {
        &self.products
    }

    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    #[must_use]
    pub fn is_stale(&self, products: &[Product]) -> bool {
        self.signature != catalog_signature(products)
    }

    #[must_use]
    pub fn get_by_id(&self, id: &str) -> Option<&Product> {
        self.by_id
            .get(&id.to_lowercase())
            .map(|&i| &self.products[i])
    }

    #[must_use]
    pub fn get_by_fingerprint(&self, fingerprint: &str) -> Option<&Product> {
        self.by_fingerprint
            .get(fingerprint)
            .map(|&i| &self.products[i])
    }

    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&Product> {
        self.by_name
            .get(&normalize_name(name))
            .map(|&i| &self.products[i])
    }

    /// Resolve a reference: id, then fingerprint, then normalized name.
    #[must_use]
    pub fn resolve(&self, product_ref: &ProductRef) -> Option<&Product> {
        product_ref
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
            .and_then(|id| self.get_by_id(id))
            .or_else(|| {
                product_ref
                    .fingerprint
                    .as_deref()
                    .and_then(|fp| self.get_by_fingerprint(fp))
            })
            .or_else(|| self.get_by_name(&product_ref.name))
    }

    #[must_use]
    pub fn resolve_item(&self, item: &Item) -> Option<&Product> {
        self.resolve(&item.product_ref)
    }

    /// Look up a user-typed key: an id first, then a name.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<&Product> {
        self.get_by_id(key).or_else(|| self.get_by_name(key))
    }
}
