//! Notification bodies.

use html_escape::{encode_double_quoted_attribute, encode_text};

use super::Notification;
use crate::models::ListingRecord;

const LISTINGS_TEMPLATE: &str = r#"<html>
    <head>
        <style>
            body { font-family: Arial, sans-serif; }
            .listing { margin-bottom: 20px; padding: 10px; border: 1px solid #ddd; border-radius: 5px; }
            a { color: #0066cc; text-decoration: none; }
            a:hover { text-decoration: underline; }
        </style>
    </head>
    <body>
        <h2>New Items Found</h2>
{listings}
        <p style="color: #666; font-size: 12px;">
            This is an automated notification from listing-watch.
        </p>
    </body>
</html>
"#;

/// Subject line for a batch of new listings.
pub fn listings_subject(prefix: &str, count: usize) -> String {
    format!("{prefix} {count} New Items Found")
}

/// Subject line for an error alert.
pub fn alert_subject(prefix: &str) -> String {
    format!("{prefix} Error Alert")
}

/// Render one notification covering `records`.
pub fn listings_notification(prefix: &str, records: &[ListingRecord]) -> Notification {
    let listings: String = records.iter().map(listing_html).collect();
    let html = LISTINGS_TEMPLATE.replace("{listings}", &listings);

    let mut text = String::from("New Items Found\n\n");
    for record in records {
        text.push_str(&format!(
            "{}\n  {}\n  Location: {}\n  Posted: {}\n\n",
            record.title, record.link, record.location, record.posted_time
        ));
    }

    Notification {
        subject: listings_subject(prefix, records.len()),
        html,
        text,
    }
}

/// Render an operational error alert.
pub fn alert_notification(prefix: &str, message: &str) -> Notification {
    let html = format!(
        "<html><body>\n    <h2>listing-watch error</h2>\n    <p style=\"color: red;\">{}</p>\n</body></html>\n",
        encode_text(message)
    );
    Notification {
        subject: alert_subject(prefix),
        html,
        text: format!("listing-watch error\n\n{message}\n"),
    }
}

fn listing_html(record: &ListingRecord) -> String {
    format!(
        r#"        <div class="listing">
            <h3><a href="{link}">{title}</a></h3>
            <p>Location: {location}</p>
            <p>Posted: {posted}</p>
        </div>
"#,
        link = encode_double_quoted_attribute(&record.link),
        title = encode_text(&record.title),
        location = encode_text(&record.location),
        posted = encode_text(&record.posted_time),
    )
}
