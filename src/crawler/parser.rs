//! HTML parser for review listing pages
//!
//! This module handles turning a fetched listing page into review records:
//! - One `Review` per review card
//! - Ukrainian rating categories mapped to English names
//! - Pros, cons and drive type mapped onto their fixed vocabularies
//! - The last page number from the pagination bar

use crate::crawler::dates::parse_review_date;
use crate::state::PageId;
use crate::storage::{Characteristic, DriveType, Review};
use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

/// Errors that can occur while extracting records
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("page is not a review listing")]
    NotAListing,

    #[error("none of the {0} review cards could be read")]
    NoReadableCards(usize),

    #[error("invalid selector: {0}")]
    Selector(String),
}

/// Converts raw page content into review records
pub trait Parser: Send + Sync {
    /// Extracts every review on the page
    ///
    /// An empty vector means the listing has run out of reviews.
    fn parse(&self, raw: &str) -> Result<Vec<Review>, ParseError>;

    /// Highest page number the page links to, if it shows pagination
    fn last_page(&self, _raw: &str) -> Option<PageId> {
        None
    }
}

/// Rating category label on the card -> stored name
const RATING_CATEGORIES: [(&str, &str); 5] = [
    ("Керування", "Handling"),
    ("Надійність", "Reliability"),
    ("Комфорт", "Comfort"),
    ("Ціна", "Price"),
    ("Дизайн", "Styling"),
];

struct Selectors {
    card: Selector,
    name_link: Selector,
    body: Selector,
    total_rating: Selector,
    rating_item: Selector,
    rating_title: Selector,
    rating_value: Selector,
    mileage: Selector,
    fuel: Selector,
    drive_type: Selector,
    pros: Selector,
    cons: Selector,
    date: Selector,
    page_link: Selector,
    listing_marker: Selector,
}

fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|_| ParseError::Selector(css.to_string()))
}

impl Selectors {
    fn new() -> Result<Self, ParseError> {
        Ok(Self {
            card: selector("article.reviews-car-card_i")?,
            name_link: selector("a.reviews-cars_name-link")?,
            body: selector("p[itemprop='reviewBody']")?,
            total_rating: selector("span.dupl-number")?,
            rating_item: selector("li.reviews-car-cardrat-i")?,
            rating_title: selector("div.reviews-car-card_rat-tit")?,
            rating_value: selector("strong.reviews-car-card_rating-val")?,
            mileage: selector("span.reviews-cars__char[title='Пробіг']")?,
            fuel: selector("span.reviews-cars__char[title='Витрати пального']")?,
            drive_type: selector("span.reviews-cars__char.reviews-cars__type")?,
            pros: selector("p.reviews-car-card_plus")?,
            cons: selector("p.reviews-car-card_minus")?,
            date: selector("span.reviews-car-card_author-date")?,
            page_link: selector(".page-link")?,
            listing_marker: selector("[class*='reviews-car'], .page-link")?,
        })
    }
}

/// Parser for the car review listing
pub struct ReviewListingParser {
    selectors: Selectors,
    today: Option<NaiveDate>,
}

impl ReviewListingParser {
    pub fn new() -> Result<Self, ParseError> {
        Ok(Self {
            selectors: Selectors::new()?,
            today: None,
        })
    }

    /// Resolves relative dates against a fixed day instead of the clock
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn parse_card(&self, card: ElementRef<'_>, today: NaiveDate) -> Option<Review> {
        let s = &self.selectors;

        let name_link = card.select(&s.name_link).next()?;
        let (name, year) = split_name_year(&text_of(name_link))?;
        let link = name_link
            .value()
            .attr("href")
            .map(|href| href.trim().trim_start_matches('/').to_string())
            .filter(|href| !href.is_empty())?;

        let mut review = Review::new(link, name, year);

        review.review_text = first_text(card, &s.body);
        review.total_rating = first_text(card, &s.total_rating).and_then(|t| parse_decimal(&t));

        for item in card.select(&s.rating_item) {
            let title = item.select(&s.rating_title).next().map(text_of);
            let value = item
                .select(&s.rating_value)
                .next()
                .and_then(|v| text_of(v).parse::<u8>().ok());
            if let (Some(title), Some(value)) = (title, value) {
                let category = RATING_CATEGORIES
                    .iter()
                    .find(|(label, _)| *label == title)
                    .map(|(_, name)| name.to_string())
                    .unwrap_or(title);
                review.rating_components.insert(category, value);
            }
        }

        review.mileage = first_text(card, &s.mileage)
            .and_then(|t| t.split_whitespace().next().and_then(|n| n.parse().ok()));
        review.fuel_consumption = first_text(card, &s.fuel)
            .and_then(|t| t.split_whitespace().next().and_then(parse_decimal));
        review.drive_type = first_text(card, &s.drive_type).and_then(|label| {
            let drive_type = DriveType::from_label(&label);
            if drive_type.is_none() {
                tracing::warn!("Review {}: unknown drive type {:?}", review.link, label);
            }
            drive_type
        });

        review.pros_text = first_text(card, &s.pros);
        review.pros = review
            .pros_text
            .as_deref()
            .map(|text| characteristics(&review.link, text))
            .unwrap_or_default();
        review.cons_text = first_text(card, &s.cons);
        review.cons = review
            .cons_text
            .as_deref()
            .map(|text| characteristics(&review.link, text))
            .unwrap_or_default();

        review.date = match first_text(card, &s.date) {
            Some(text) => {
                let date = parse_review_date(&text, today);
                if date.is_none() {
                    tracing::warn!("Review {}: unrecognised date {:?}", review.link, text);
                }
                date
            }
            None => None,
        };

        Some(review)
    }
}

impl Parser for ReviewListingParser {
    fn parse(&self, raw: &str) -> Result<Vec<Review>, ParseError> {
        let document = Html::parse_document(raw);
        let today = self
            .today
            .unwrap_or_else(|| chrono::Local::now().date_naive());

        let cards: Vec<ElementRef<'_>> = document.select(&self.selectors.card).collect();
        if cards.is_empty() {
            return if document.select(&self.selectors.listing_marker).next().is_some() {
                Ok(Vec::new())
            } else {
                Err(ParseError::NotAListing)
            };
        }

        let mut reviews = Vec::with_capacity(cards.len());
        for card in &cards {
            match self.parse_card(*card, today) {
                Some(review) => reviews.push(review),
                None => tracing::warn!("Skipping a review card with missing name, year or link"),
            }
        }

        if reviews.is_empty() {
            return Err(ParseError::NoReadableCards(cards.len()));
        }
        Ok(reviews)
    }

    fn last_page(&self, raw: &str) -> Option<PageId> {
        let document = Html::parse_document(raw);
        document
            .select(&self.selectors.page_link)
            .filter_map(|link| text_of(link).parse::<u64>().ok())
            .max()
            .map(PageId)
    }
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
}

/// "Citroen C-Elysee 2023" -> ("Citroen C-Elysee", 2023)
fn split_name_year(text: &str) -> Option<(String, u16)> {
    let text = text.trim();
    let split = text.len().checked_sub(4)?;
    let year = text.get(split..)?.parse::<u16>().ok()?;
    let name = text.get(..split)?.trim_end();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), year))
}

fn parse_decimal(text: &str) -> Option<f64> {
    text.trim().replace(',', ".").parse().ok()
}

/// Maps a comma-separated label list onto known characteristics
///
/// Labels outside the vocabulary are dropped from the result; they remain in
/// the raw text stored next to it.
fn characteristics(link: &str, text: &str) -> Vec<Characteristic> {
    let mut found = Vec::new();
    for label in text.split(',').map(str::trim).filter(|l| !l.is_empty()) {
        match Characteristic::from_label(label) {
            Some(c) if !found.contains(&c) => found.push(c),
            Some(_) => {}
            None => tracing::warn!("Review {}: unknown characteristic {:?}", link, label),
        }
    }
    found
}
