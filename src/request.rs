//! Key material for one dish image request.

/// What the chat flow knows about a dish when it asks for a photo.
///
/// `dish_name` and `recipe_text` identify the cache entry; `visual_desc`
/// only feeds prompt construction.
///
/// ```rust
/// # use plating::DishRequest;
/// let request = DishRequest::new("Borscht")
///     .recipe("Ingredients:\n- beets\n- cabbage")
///     .visual("deep red soup with a dollop of sour cream");
/// assert_eq!(request.dish_name, "Borscht");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DishRequest {
    pub dish_name: String,
    pub recipe_text: Option<String>,
    pub visual_desc: Option<String>,
}

impl DishRequest {
    pub fn new(dish_name: impl Into<String>) -> Self {
        Self {
            dish_name: dish_name.into(),
            ..Default::default()
        }
    }

    /// Attach the full recipe text.
    pub fn recipe(mut self, text: impl Into<String>) -> Self {
        self.recipe_text = Some(text.into());
        self
    }

    /// Attach a visual description (typically written by the LLM).
    pub fn visual(mut self, desc: impl Into<String>) -> Self {
        self.visual_desc = Some(desc.into());
        self
    }

    /// Build from the optional parts the chat handlers pass around.
    pub fn from_parts(
        dish_name: &str,
        recipe_text: Option<&str>,
        visual_desc: Option<&str>,
    ) -> Self {
        Self {
            dish_name: dish_name.to_string(),
            recipe_text: recipe_text.map(str::to_string),
            visual_desc: visual_desc.map(str::to_string),
        }
    }

    pub fn recipe_text(&self) -> Option<&str> {
        self.recipe_text.as_deref()
    }

    pub fn visual_desc(&self) -> Option<&str> {
        self.visual_desc.as_deref()
    }
}
