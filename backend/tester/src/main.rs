use bank::{
    menu::{Bank, Item},
    slugify, write_bank,
};
use clap::Parser;
use prost::Message;

const SAMPLE_MENU: &[(&str, u32, &str)] = &[
    ("Classic Burger", 650, "Main Kitchen"),
    ("Veggie Burger", 650, "Main Kitchen"),
    ("Fries", 250, "Main Kitchen"),
    ("Garden Salad", 500, "Salad Bar"),
    ("Tomato Soup", 350, "Soup Station"),
    ("Chicken Tenders (3 pc)", 700, "Main Kitchen"),
    ("Chocolate Chip Cookie", 150, "Bakery"),
];

/// Writes a sample menu bank for local runs of the cart server.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Output path for the encoded bank.
    #[arg(default_value = "menu.bin")]
    output: String,

    /// Slugs to mark unavailable.
    #[arg(long = "unavailable")]
    unavailable: Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let mut bank = Bank::default();
    for &(name, price_cents, location) in SAMPLE_MENU {
        let slug = slugify(name);
        let available = !args.unavailable.contains(&slug);

        let status = if available { "available" } else { "unavailable" };
        println!("{slug:<28} {price_cents:>5} {status}");

        bank.items.insert(
            slug,
            Item {
                name: name.to_string(),
                available,
                price_cents,
                location: location.to_string(),
            },
        );
    }

    write_bank(&args.output, &bank)?;
    println!("Wrote {} items ({} bytes) to {}", bank.items.len(), bank.encoded_len(), args.output);

    Ok(())
}
