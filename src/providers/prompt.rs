//! Prompt construction.
//!
//! Both builders are pure functions of the [`DishRequest`]: the same
//! request always yields the same prompt, so prompt quality can be tested
//! without a network. Keyword tables cover English and Russian since the
//! bot serves both.

use crate::DishRequest;

/// Upper bound for the primary provider's sentence-style prompt.
pub const PRIMARY_PROMPT_MAX_CHARS: usize = 1000;

/// Upper bound for the fallback provider's comma-joined prompt.
pub const FALLBACK_PROMPT_MAX_CHARS: usize = 500;

const MAX_INGREDIENTS: usize = 5;
const MAX_ELEMENTS: usize = 3;
const FALLBACK_SCAN_LINES: usize = 10;

const DEFAULT_INGREDIENTS: &str = "fresh ingredients, beautifully presented";
const DEFAULT_ELEMENTS: &str = "fresh ingredients, beautiful presentation";

/// Words that describe the picture rather than the food.
const PHOTO_WORDS: &[&str] = &["professional", "photography", "photo", "image", "picture"];
const PHOTO_WORDS_AND_OF: &[&str] = &[
    "professional",
    "photography",
    "photo",
    "image",
    "picture",
    "of",
];

const SECTION_START: &[&str] = &["ingredient", "состав", "продукт", "ингредиент"];
const SECTION_END: &[&str] = &["instruction", "steps", "приготовлен", "инструкц", "шаг"];

const LIST_MARKERS: &[char] = &['-', '•', '*', '–'];

const CUISINES: &[(&str, &[&str])] = &[
    ("italian", &["pasta", "pizza", "risotto", "bruschetta", "tiramisu"]),
    ("asian", &["sushi", "ramen", "stir fry", "curry", "dumpling"]),
    ("french", &["ratatouille", "quiche", "crepe", "souffle", "croissant"]),
    ("mexican", &["taco", "burrito", "guacamole", "enchilada", "quesadilla"]),
    ("russian", &["борщ", "блины", "пельмени", "окрошка", "салат оливье"]),
    (
        "dessert",
        &["cake", "pie", "cookie", "ice cream", "chocolate", "десерт", "торт"],
    ),
];

const HOME_STYLE_WORDS: &[&str] = &["simple", "basic", "easy", "quick", "простой", "быстрый"];
const FINE_DINING_WORDS: &[&str] = &["gourmet", "fine dining", "luxury", "премиум"];

const FALLBACK_STYLES: &[(&[&str], &str)] = &[
    (
        &["cake", "pie", "cookie", "dessert", "sweet", "chocolate", "торт", "десерт"],
        "food photography, dessert styling, studio lighting",
    ),
    (
        &["salad", "vegetable", "fresh", "зелень", "овощ", "салат"],
        "fresh, vibrant, natural light, healthy food",
    ),
    (
        &["meat", "steak", "chicken", "beef", "pork", "мясо", "куриц", "говядин"],
        "restaurant quality, gourmet, dramatic lighting",
    ),
    (
        &["soup", "stew", "broth", "суп", "бульон", "похлебка"],
        "comfort food, rustic, warm lighting",
    ),
    (
        &["pasta", "pizza", "italian", "итальянск", "паста", "пицца"],
        "Italian cuisine, rustic, wood-fired",
    ),
    (
        &["sushi", "asian", "japanese", "chinese", "суши", "азиатск"],
        "Japanese minimalism, clean presentation",
    ),
];
const FALLBACK_DEFAULT_STYLE: &str = "restaurant quality, professional food styling";

// ============================================================================
// Primary provider
// ============================================================================

/// Sentence-style prompt for the primary provider.
pub fn primary_prompt(request: &DishRequest) -> String {
    let ingredients = primary_ingredients(request.recipe_text(), request.visual_desc());
    let style = primary_style(&request.dish_name, &ingredients);

    let parts = [
        format!("Professional food photography of {}.", request.dish_name),
        format!("Ingredients: {ingredients}."),
        format!("Style: {style}."),
        "High quality, restaurant presentation.".to_string(),
        "Natural window lighting, soft shadows.".to_string(),
        "Shallow depth of field, blurred background.".to_string(),
        "Clean plate on rustic wooden table.".to_string(),
        "Appetizing, vibrant colors, fresh look.".to_string(),
        "No text, no watermark, no logos.".to_string(),
        "No people, no hands, no utensils in frame.".to_string(),
        "Square aspect ratio 1:1.".to_string(),
        "1024x1024 resolution, sharp focus on food.".to_string(),
    ];
    let prompt = parts.join(" ");

    if prompt.chars().count() > PRIMARY_PROMPT_MAX_CHARS {
        let mut cut = truncate_chars(&prompt, PRIMARY_PROMPT_MAX_CHARS);
        cut.push_str("...");
        cut
    } else {
        prompt
    }
}

/// Up to five ingredient phrases from the visual description and the
/// recipe's ingredient section.
pub fn primary_ingredients(recipe_text: Option<&str>, visual_desc: Option<&str>) -> String {
    let mut found = Vec::new();
    if let Some(desc) = visual_desc {
        found.push(strip_words(desc, PHOTO_WORDS_AND_OF));
    }

    if let Some(recipe) = recipe_text {
        let mut in_section = false;
        for line in recipe.lines() {
            let lower = line.to_lowercase();
            if SECTION_START.iter().any(|k| lower.contains(k)) {
                in_section = true;
                continue;
            }
            if !in_section {
                continue;
            }
            if SECTION_END.iter().any(|k| lower.contains(k)) {
                break;
            }
            let item = strip_list_marker(line);
            if item.chars().count() > 2 && item.chars().count() < 100 {
                found.push(item.to_string());
                if found.len() >= MAX_INGREDIENTS {
                    break;
                }
            }
        }
    }

    let unique = dedup_phrases(found, MAX_INGREDIENTS);
    if unique.is_empty() {
        DEFAULT_INGREDIENTS.to_string()
    } else {
        unique.join(", ")
    }
}

/// Cuisine plus presentation level, e.g. `"italian restaurant quality"`.
pub fn primary_style(dish_name: &str, ingredients: &str) -> String {
    let dish = dish_name.to_lowercase();
    let ingredients = ingredients.to_lowercase();

    let cuisine = CUISINES
        .iter()
        .find(|(_, words)| {
            words
                .iter()
                .any(|w| dish.contains(w) || ingredients.contains(w))
        })
        .map_or("international", |(name, _)| *name);

    let presentation = if HOME_STYLE_WORDS.iter().any(|w| dish.contains(w)) {
        "home-style, rustic"
    } else if FINE_DINING_WORDS.iter().any(|w| dish.contains(w)) {
        "fine dining, gourmet"
    } else {
        "restaurant quality"
    };

    format!("{cuisine} {presentation}")
}

// ============================================================================
// Fallback provider
// ============================================================================

/// Comma-joined prompt for the fallback provider.
///
/// When the full prompt is too long it shrinks to the dish, a shortened
/// element list, the style and one quality phrase.
pub fn fallback_prompt(request: &DishRequest) -> String {
    let elements = fallback_elements(request.recipe_text(), request.visual_desc());
    let style = fallback_style(&request.dish_name, &elements);
    let head = format!("Professional food photography of {}", request.dish_name);

    let prompt = [
        head.as_str(),
        elements.as_str(),
        style,
        "highly detailed, sharp focus",
        "appetizing, delicious looking",
        "natural window lighting, soft shadows",
        "shallow depth of field, blurred background",
        "clean plate, food styling",
        "square aspect ratio 1:1",
        "1024x1024 resolution",
    ]
    .join(", ");

    if prompt.chars().count() <= FALLBACK_PROMPT_MAX_CHARS {
        return prompt;
    }

    let short_elements = truncate_chars(&elements, 100);
    let essential = [
        head.as_str(),
        short_elements.as_str(),
        style,
        "appetizing, delicious looking",
    ]
    .join(", ");
    truncate_chars(&essential, FALLBACK_PROMPT_MAX_CHARS)
}

/// Up to three short list items from the top of the recipe, after the
/// visual description.
pub fn fallback_elements(recipe_text: Option<&str>, visual_desc: Option<&str>) -> String {
    let mut found = Vec::new();
    if let Some(desc) = visual_desc {
        found.push(strip_words(desc, PHOTO_WORDS));
    }

    if let Some(recipe) = recipe_text {
        for line in recipe.lines().take(FALLBACK_SCAN_LINES) {
            let trimmed = line.trim();
            if !trimmed.contains(LIST_MARKERS) || trimmed.chars().count() <= 5 {
                continue;
            }
            let item = strip_list_marker(trimmed);
            let words = item.split_whitespace().count();
            if (1..=5).contains(&words) {
                found.push(item.to_string());
                if found.len() >= MAX_ELEMENTS {
                    break;
                }
            }
        }
    }

    let unique = dedup_phrases(found, MAX_ELEMENTS);
    if unique.is_empty() {
        DEFAULT_ELEMENTS.to_string()
    } else {
        unique.join(", ")
    }
}

/// Style phrase picked by dish category.
pub fn fallback_style(dish_name: &str, elements: &str) -> &'static str {
    let dish = dish_name.to_lowercase();
    let elements = elements.to_lowercase();
    FALLBACK_STYLES
        .iter()
        .find(|(words, _)| {
            words
                .iter()
                .any(|w| dish.contains(w) || elements.contains(w))
        })
        .map_or(FALLBACK_DEFAULT_STYLE, |(_, style)| *style)
}

// ============================================================================
// Helpers
// ============================================================================

/// Lowercase `text` and drop whole words found in `words`.
fn strip_words(text: &str, words: &[&str]) -> String {
    text.to_lowercase()
        .split_whitespace()
        .filter(|w| {
            let bare = w.trim_matches(|c: char| !c.is_alphanumeric());
            !words.contains(&bare)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_list_marker(line: &str) -> &str {
    line.trim()
        .trim_start_matches(|c: char| LIST_MARKERS.contains(&c) || c == ' ')
        .trim()
}

/// Keep the first occurrence of each phrase longer than two characters.
fn dedup_phrases(phrases: Vec<String>, limit: usize) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(limit);
    for phrase in phrases {
        if phrase.chars().count() > 2 && !unique.contains(&phrase) {
            unique.push(phrase);
            if unique.len() == limit {
                break;
            }
        }
    }
    unique
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
