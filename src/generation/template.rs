//! Cheap deterministic output used when the generation budget is exhausted

use crate::cache::types::CacheValue;
use crate::generation::features::RequestFeatures;
use serde::{Deserialize, Serialize};

/// A parameterized body keyed by the traits it describes.
///
/// Bodies may use `{primary}`, `{secondary}` and `{traits}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,

    /// Lowercased, sorted trait combination this template is written for
    pub traits: Vec<String>,

    pub body: String,
}

impl Template {
    pub fn new(traits: &[&str], body: impl Into<String>) -> Self {
        let mut traits: Vec<String> = traits.iter().map(|t| t.trim().to_lowercase()).collect();
        traits.sort();
        traits.dedup();

        Self {
            name: if traits.is_empty() {
                "default".to_string()
            } else {
                traits.join("+")
            },
            traits,
            body: body.into(),
        }
    }

    /// Fill the placeholders from the request's traits
    pub fn render(&self, features: &RequestFeatures) -> String {
        let dominant = features.dominant_traits(2);
        let primary = dominant
            .first()
            .cloned()
            .unwrap_or_else(|| "signature".to_string());
        let secondary = dominant.get(1).cloned().unwrap_or_else(|| primary.clone());

        let names = features.trait_names();
        let traits = if names.is_empty() {
            primary.clone()
        } else {
            names.join(", ")
        };

        self.body
            .replace("{primary}", &primary)
            .replace("{secondary}", &secondary)
            .replace("{traits}", &traits)
    }

    fn overlap(&self, names: &[String]) -> usize {
        self.traits.iter().filter(|t| names.contains(t)).count()
    }
}

/// Fixed set of templates with a default
#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    templates: Vec<Template>,
    default: Template,
}

impl TemplateLibrary {
    /// Library with only a default template
    pub fn new(default_body: impl Into<String>) -> Self {
        Self {
            templates: Vec::new(),
            default: Template::new(&[], default_body),
        }
    }

    pub fn with_template(mut self, traits: &[&str], body: impl Into<String>) -> Self {
        self.templates.push(Template::new(traits, body));
        self
    }

    /// Fragrance descriptions keyed by scent family
    pub fn fragrance() -> Self {
        Self::new(
            "A distinctive fragrance with {traits} character. A versatile pick worth sampling \
             before committing to a full bottle.",
        )
        .with_template(
            &["fresh"],
            "A bright, airy {primary} scent that feels clean and effortless. Notes of {traits} \
             keep it crisp from first spray to dry-down.",
        )
        .with_template(
            &["citrus"],
            "A sparkling {primary} opening full of zest. Expect an energizing, sunny wear with \
             hints of {traits}.",
        )
        .with_template(
            &["floral"],
            "A graceful {primary} bouquet with a soft, romantic trail. Shaped by {traits}, it \
             suits both daytime and evening.",
        )
        .with_template(
            &["woody"],
            "A grounded {primary} composition with warmth and depth. Accents of {traits} give \
             it quiet confidence.",
        )
        .with_template(
            &["amber"],
            "A rich {primary} blend that glows on skin. Layers of {traits} make it cozy and \
             long-lasting.",
        )
        .with_template(
            &["gourmand"],
            "A delicious {primary} scent with an edible, comforting sweetness. Touches of \
             {traits} keep it playful.",
        )
        .with_template(
            &["fresh", "citrus"],
            "A crisp blend of {primary} and {secondary} that feels like a cool breeze on a \
             summer morning.",
        )
        .with_template(
            &["floral", "woody"],
            "Soft {primary} petals over a {secondary} base, balancing elegance with warmth.",
        )
        .with_template(
            &["woody", "amber"],
            "A smoldering mix of {primary} and {secondary}, ideal for cool evenings.",
        )
        .with_template(
            &["amber", "gourmand"],
            "A decadent {primary} and {secondary} pairing, sweet and enveloping.",
        )
        .with_template(
            &["floral", "fresh"],
            "Dewy {primary} freshness lifted by {secondary} notes, light enough for every day.",
        )
    }

    /// Pick the template for a request: the exact dominant combination if
    /// one exists, else the one sharing the most traits with the request,
    /// else the default
    pub fn select(&self, features: &RequestFeatures) -> &Template {
        let mut dominant = features.dominant_traits(2);
        dominant.sort();

        if !dominant.is_empty() {
            if let Some(exact) = self.templates.iter().find(|t| t.traits == dominant) {
                return exact;
            }
        }

        let names = features.trait_names();
        let mut best: Option<(&Template, usize)> = None;
        for template in &self.templates {
            let overlap = template.overlap(&names);
            if overlap == 0 {
                continue;
            }
            let better = match best {
                None => true,
                Some((current, best_overlap)) => {
                    overlap > best_overlap
                        || (overlap == best_overlap && template.traits.len() < current.traits.len())
                }
            };
            if better {
                best = Some((template, overlap));
            }
        }

        best.map(|(t, _)| t).unwrap_or(&self.default)
    }

    /// Render the selected template as a cache value
    pub fn render(&self, features: &RequestFeatures) -> CacheValue {
        CacheValue::String(self.select(features).render(features))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl Default for TemplateLibrary {
    fn default() -> Self {
        Self::fragrance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_combination_preferred() {
        let library = TemplateLibrary::fragrance();
        let features = RequestFeatures::new()
            .with_trait("amber", 0.6)
            .with_trait("woody", 0.9)
            .with_trait("citrus", 0.1);

        assert_eq!(library.select(&features).name, "amber+woody");
    }

    #[test]
    fn test_single_trait_exact() {
        let library = TemplateLibrary::fragrance();
        let features = RequestFeatures::new().with_trait("Citrus", 1.0);
        assert_eq!(library.select(&features).name, "citrus");
    }

    #[test]
    fn test_closest_by_overlap() {
        let library = TemplateLibrary::fragrance();
        // No "aquatic+gourmand" template; gourmand overlaps
        let features = RequestFeatures::new()
            .with_trait("aquatic", 0.9)
            .with_trait("gourmand", 0.5);

        assert_eq!(library.select(&features).name, "gourmand");
    }

    #[test]
    fn test_default_when_nothing_overlaps() {
        let library = TemplateLibrary::fragrance();
        let features = RequestFeatures::new().with_trait("leather", 1.0);
        assert_eq!(library.select(&features).name, "default");

        let rendered = library.render(&features);
        assert_eq!(
            rendered.as_str().map(|s| s.contains("leather character")),
            Some(true)
        );
    }

    #[test]
    fn test_render_placeholders() {
        let template = Template::new(&["a", "b"], "{primary}/{secondary}/{traits}");
        let features = RequestFeatures::new()
            .with_trait("woody", 0.9)
            .with_trait("amber", 0.5)
            .with_trait("smoky", 0.1);

        assert_eq!(template.render(&features), "woody/amber/woody, amber, smoky");
    }

    #[test]
    fn test_render_without_traits() {
        let template = Template::new(&[], "{primary}|{secondary}|{traits}");
        assert_eq!(
            template.render(&RequestFeatures::new()),
            "signature|signature|signature"
        );
    }
}
