//! crates/bar_bot_core/src/catalog.rs
//!
//! Read-only views over the catalog used by the dialogue engine: category
//! ordering, alphabetical product lists, and resolving a customer's free-text
//! pick against the list they were shown.

use crate::domain::{Menu, Product};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Categories shown first, in this order. Anything else follows alphabetically.
pub const CURATED_CATEGORY_ORDER: [&str; 9] = [
    "Cocktails", "Chasers", "Gin", "Whisky", "Spirits", "Vodka", "Brandy", "Rum", "Shots",
];

/// The chat channel's selectable-list ceiling.
pub const MAX_LIST_ITEMS: usize = 10;

/// Orders the menu's non-empty categories: curated ones first, the rest
/// alphabetically, truncated to [`MAX_LIST_ITEMS`].
pub fn ordered_categories(menu: &Menu) -> Vec<String> {
    let available: Vec<&String> = menu
        .iter()
        .filter(|(_, products)| !products.is_empty())
        .map(|(name, _)| name)
        .collect();

    let mut ordered: Vec<String> = CURATED_CATEGORY_ORDER
        .iter()
        .filter(|curated| available.iter().any(|name| name.as_str() == **curated))
        .map(|curated| curated.to_string())
        .collect();

    let mut rest: Vec<String> = available
        .into_iter()
        .filter(|name| !CURATED_CATEGORY_ORDER.contains(&name.as_str()))
        .cloned()
        .collect();
    rest.sort_by_key(|name| name.to_lowercase());

    ordered.extend(rest);
    ordered.truncate(MAX_LIST_ITEMS);
    ordered
}

/// Sorts products by name, case-insensitively. Ties keep their input order.
pub fn sort_alphabetically(mut products: Vec<Product>) -> Vec<Product> {
    products.sort_by_key(|p| p.name.to_lowercase());
    products
}

/// Case-insensitive substring match used by free-text search.
pub fn name_matches_query(product: &Product, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    !query.is_empty() && product.is_active && product.name.to_lowercase().contains(&query)
}

//=========================================================================================
// Product Selection
//=========================================================================================

/// The ways a reply can pick a product, tried in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMatch {
    /// The reply is a product id from an interactive list.
    Identifier,
    /// The reply is a 1-based position in the alphabetical list.
    Index,
    /// The reply equals a product name, ignoring case.
    ExactName,
    /// The reply is contained in a product name; the first alphabetically wins.
    PartialName,
}

pub const SELECTION_ORDER: [SelectionMatch; 4] = [
    SelectionMatch::Identifier,
    SelectionMatch::Index,
    SelectionMatch::ExactName,
    SelectionMatch::PartialName,
];

impl SelectionMatch {
    fn find<'a>(self, input: &str, products: &'a [Product]) -> Option<&'a Product> {
        match self {
            SelectionMatch::Identifier => {
                let id = Uuid::parse_str(input).ok()?;
                products.iter().find(|p| p.id == id)
            }
            SelectionMatch::Index => {
                let index = input.parse::<usize>().ok()?;
                index.checked_sub(1).and_then(|i| products.get(i))
            }
            SelectionMatch::ExactName => {
                let wanted = input.to_lowercase();
                products.iter().find(|p| p.name.to_lowercase() == wanted)
            }
            SelectionMatch::PartialName => {
                let wanted = input.to_lowercase();
                products.iter().find(|p| p.name.to_lowercase().contains(&wanted))
            }
        }
    }
}

/// Resolves `input` against `products`, which must already be sorted
/// alphabetically (the order the customer saw).
pub fn select_product<'a>(
    input: &str,
    products: &'a [Product],
) -> Option<(&'a Product, SelectionMatch)> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    SELECTION_ORDER
        .iter()
        .find_map(|strategy| strategy.find(input, products).map(|p| (p, *strategy)))
}

/// Renders an amount as shown to customers, e.g. `KES 1500` or `KES 450.50`.
pub fn format_kes(amount: Decimal) -> String {
    if amount.fract().is_zero() {
        format!("KES {}", amount.trunc())
    } else {
        format!("KES {}", amount.round_dp(2))
    }
}

/// A numbered, alphabetical product listing: `1. Name - KES 450`.
pub fn numbered_listing(products: &[Product]) -> String {
    products
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{}. {} - {}", i + 1, p.name, format_kes(p.price)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(name: &str, category: &str, stock: i32) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            price: dec!(500),
            category: category.to_string(),
            stock_quantity: stock,
            is_active: true,
        }
    }

    fn menu_with(categories: &[&str]) -> Menu {
        categories
            .iter()
            .map(|c| (c.to_string(), vec![product("Anything", c, 1)]))
            .collect()
    }

    #[test]
    fn curated_categories_come_first_then_alphabetical() {
        let menu = menu_with(&["Wine", "Gin", "beer", "Cocktails", "Shots", "Ales"]);
        assert_eq!(
            ordered_categories(&menu),
            vec!["Cocktails", "Gin", "Shots", "Ales", "beer", "Wine"]
        );
    }

    #[test]
    fn category_list_is_capped_at_ten() {
        let menu = menu_with(&[
            "Cocktails", "Chasers", "Gin", "Whisky", "Spirits", "Vodka", "Brandy", "Rum",
            "Shots", "Beer", "Wine", "Soft Drinks",
        ]);
        let ordered = ordered_categories(&menu);
        assert_eq!(ordered.len(), MAX_LIST_ITEMS);
        assert_eq!(ordered[8], "Shots");
        assert_eq!(ordered[9], "Beer");
    }

    #[test]
    fn empty_categories_are_hidden() {
        let mut menu = menu_with(&["Gin"]);
        menu.insert("Rum".to_string(), Vec::new());
        assert_eq!(ordered_categories(&menu), vec!["Gin"]);
    }

    #[test]
    fn selection_prefers_identifier_then_index_then_names() {
        let products = sort_alphabetically(vec![
            product("Tanqueray", "Gin", 5),
            product("Gilbey's", "Gin", 5),
            product("Beefeater", "Gin", 5),
        ]);
        let tanqueray_id = products[2].id.to_string();

        let (p, how) = select_product(&tanqueray_id, &products).unwrap();
        assert_eq!((p.name.as_str(), how), ("Tanqueray", SelectionMatch::Identifier));

        let (p, how) = select_product("2", &products).unwrap();
        assert_eq!((p.name.as_str(), how), ("Gilbey's", SelectionMatch::Index));

        let (p, how) = select_product("BEEFEATER", &products).unwrap();
        assert_eq!((p.name.as_str(), how), ("Beefeater", SelectionMatch::ExactName));

        let (p, how) = select_product("quer", &products).unwrap();
        assert_eq!((p.name.as_str(), how), ("Tanqueray", SelectionMatch::PartialName));
    }

    #[test]
    fn identifier_outside_the_active_set_does_not_match() {
        let products = vec![product("Tanqueray", "Gin", 5)];
        let foreign = Uuid::new_v4().to_string();
        assert!(select_product(&foreign, &products).is_none());
    }

    #[test]
    fn ambiguous_partial_match_takes_first_alphabetically() {
        let products = sort_alphabetically(vec![
            product("Johnnie Walker Red", "Whisky", 5),
            product("Johnnie Walker Black", "Whisky", 5),
        ]);
        let (p, _) = select_product("walker", &products).unwrap();
        assert_eq!(p.name, "Johnnie Walker Black");
    }

    #[test]
    fn out_of_range_number_falls_through_to_names() {
        let products = sort_alphabetically(vec![
            product("1800 Silver", "Tequila", 5),
            product("Olmeca", "Tequila", 5),
        ]);
        let (p, how) = select_product("1800", &products).unwrap();
        assert_eq!((p.name.as_str(), how), ("1800 Silver", SelectionMatch::PartialName));
        assert!(select_product("7", &products).is_none());
        assert!(select_product("9", &products).is_none());
    }

    #[test]
    fn money_is_rendered_without_needless_decimals() {
        assert_eq!(format_kes(dec!(1500)), "KES 1500");
        assert_eq!(format_kes(dec!(1500.00)), "KES 1500");
        assert_eq!(format_kes(dec!(450.5)), "KES 450.50");
    }

    #[test]
    fn search_matches_active_names_only() {
        let mut p = product("Captain Morgan", "Rum", 3);
        assert!(name_matches_query(&p, "morgan"));
        assert!(!name_matches_query(&p, "  "));
        p.is_active = false;
        assert!(!name_matches_query(&p, "morgan"));
    }
}
