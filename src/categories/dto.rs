use serde::Deserialize;

/// Body for both `POST /categories` and `PUT /categories/:id`.
#[derive(Debug, Deserialize)]
pub struct CategoryRequest {
    #[serde(default)]
    pub name: Option<String>,
}

impl CategoryRequest {
    pub fn required_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }
}
