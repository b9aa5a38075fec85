// src/services/prompt.rs
//
// System-prompt construction for the recommendation assistant: the fixed
// instructional template with the active catalog entries of the chat's kind
// interpolated in.
use crate::error::AppError;
use crate::models::chat::ChatKind;
use crate::models::opportunity::Opportunity;
use crate::models::product::Product;
use sqlx::PgPool;

const BASE_SYSTEM_PROMPT: &str = "You are a helpful AI assistant for a directory of {{CATALOG}}. Your role is to help users find the entries that best match their needs from the catalog below.

Available {{CATALOG}}:
{{ITEMS}}

Guidelines:
1. Analyze the user's query to understand their specific needs and requirements
2. Match their needs with relevant entries from the catalog
3. If no entries match their needs exactly:
   - Suggest the closest alternatives if any exist
   - Guide them to the feedback section to describe their needs
4. Be honest and transparent about each entry's capabilities and limitations
5. Format responses clearly with:
   - Entry names in **bold**
   - Key features in bullet points
   - Clear explanations of why each entry might be suitable

Response Format:
# Recommendations

## Best Matches
* Entries that closely match the user's needs
* Key features and benefits
* Why these entries are recommended

## Alternative Options (if applicable)
* Entries that partially match the requirements
* How they differ from ideal matches

## No Matches Found (if applicable)
* Explanation of why no entries match
* Suggestion to use the feedback section
* Any relevant information about future additions to the catalog";

pub fn format_products(products: &[Product]) -> String {
    products
        .iter()
        .map(|product| {
            format!(
                "\nName: {}\nCountry: {}\nCategories: {}\nDescription: {}\nWebsite: {}\n",
                product.name,
                product.country,
                product.categories.join(", "),
                product.description,
                product.website,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_opportunities(opportunities: &[Opportunity]) -> String {
    opportunities
        .iter()
        .map(|opportunity| {
            let mut entry = format!(
                "\nName: {}\nCountry: {}\nCategories: {}\nType: {}",
                opportunity.name,
                opportunity.country,
                opportunity.categories.join(", "),
                opportunity.kind,
            );
            if let Some(ministry) = &opportunity.ministry {
                entry.push_str(&format!("\nMinistry: {}", ministry));
            }
            entry.push_str(&format!(
                "\nContact: {}\nDescription: {}\n",
                opportunity.email, opportunity.description
            ));
            entry
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_system_prompt(kind: ChatKind, items: &str) -> String {
    let catalog = match kind {
        ChatKind::Product => "products",
        ChatKind::Opportunity => "opportunities",
    };

    BASE_SYSTEM_PROMPT
        .replace("{{CATALOG}}", catalog)
        .replace("{{ITEMS}}", items)
}

/// Builds the system prompt from the currently active catalog entries.
pub async fn build_system_prompt(pool: &PgPool, kind: ChatKind) -> Result<String, AppError> {
    let items = match kind {
        ChatKind::Product => {
            let products = sqlx::query_as::<_, Product>(
                "SELECT * FROM products WHERE active = TRUE ORDER BY created_at DESC",
            )
            .fetch_all(pool)
            .await?;
            format_products(&products)
        }
        ChatKind::Opportunity => {
            let opportunities = sqlx::query_as::<_, Opportunity>(
                "SELECT * FROM opportunities WHERE active = TRUE ORDER BY created_at DESC",
            )
            .fetch_all(pool)
            .await?;
            format_opportunities(&opportunities)
        }
    };

    Ok(render_system_prompt(kind, &items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_product(name: &str) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: name.to_string(),
            country: "Kenya".to_string(),
            categories: vec!["Bible Study".to_string(), "Mobile".to_string()],
            description: "Scripture reading plans".to_string(),
            website: "https://example.org".to_string(),
            logo: None,
            active: true,
            featured: false,
            submitted_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_opportunity() -> Opportunity {
        Opportunity {
            id: Uuid::new_v4(),
            name: "Translation volunteers".to_string(),
            email: "team@example.org".to_string(),
            country: "Brazil".to_string(),
            ministry: Some("Wycliffe".to_string()),
            categories: vec!["Translation".to_string()],
            description: "Help localize study materials".to_string(),
            created_by: None,
            active: true,
            sponsored: false,
            kind: "job".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_product_formatting_lists_every_field() {
        let text = format_products(&[sample_product("VerseApp")]);
        assert!(text.contains("Name: VerseApp"));
        assert!(text.contains("Country: Kenya"));
        assert!(text.contains("Categories: Bible Study, Mobile"));
        assert!(text.contains("Website: https://example.org"));
    }

    #[test]
    fn test_opportunity_formatting_includes_contact_and_ministry() {
        let text = format_opportunities(&[sample_opportunity()]);
        assert!(text.contains("Ministry: Wycliffe"));
        assert!(text.contains("Contact: team@example.org"));
        assert!(text.contains("Type: job"));
    }

    #[test]
    fn test_template_placeholders_are_fully_substituted() {
        let items = format_products(&[sample_product("VerseApp")]);
        let prompt = render_system_prompt(ChatKind::Product, &items);
        assert!(!prompt.contains("{{CATALOG}}"));
        assert!(!prompt.contains("{{ITEMS}}"));
        assert!(prompt.contains("Available products:"));
        assert!(prompt.contains("Name: VerseApp"));
    }

    #[test]
    fn test_empty_catalog_still_renders() {
        let prompt = render_system_prompt(ChatKind::Opportunity, "");
        assert!(prompt.contains("Available opportunities:"));
        assert!(prompt.contains("## No Matches Found"));
    }
}
