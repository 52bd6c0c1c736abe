use anyhow::Result;
use std::process;

use larder_core::models::{NewProduct, Nutrients};
use larder_core::{LarderError, LarderService};

use super::helpers::{json_error, parse_date, print_product_table};

pub(crate) struct ProductArgs {
    pub name: String,
    pub kcal: f64,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
}

pub(crate) fn cmd_product_add(svc: &mut LarderService, args: ProductArgs, json: bool) -> Result<()> {
    let new = NewProduct {
        name: args.name,
        nutrients: Nutrients {
            kcal: Some(args.kcal),
            protein: args.protein,
            carbs: args.carbs,
            fat: args.fat,
            ..Nutrients::default()
        },
        fingerprint: None,
    };
    let product = svc.add_product(&new)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&product)?);
    } else {
        println!(
            "Added {} ({:.0} kcal/100g) [{}]",
            product.name,
            product.nutrients.kcal_100(),
            product.id
        );
    }
    Ok(())
}

pub(crate) fn cmd_product_list(svc: &mut LarderService, search: Option<&str>, json: bool) -> Result<()> {
    let products = svc.list_products(search)?;

    if products.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No products found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&products)?);
    } else {
        print_product_table(&products, &svc.favorites()?);
    }
    Ok(())
}

pub(crate) fn cmd_product_delete(svc: &mut LarderService, name: &str, json: bool) -> Result<()> {
    match svc.delete_product(name) {
        Ok(product) => {
            if json {
                println!("{}", serde_json::json!({ "deleted": product }));
            } else {
                println!("Deleted {}. It will not be restored by recovery.", product.name);
            }
            Ok(())
        }
        Err(LarderError::NotFound(msg)) => {
            if json {
                println!("{}", json_error(&msg));
            } else {
                eprintln!("{msg}");
            }
            process::exit(2);
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn cmd_product_restore(svc: &mut LarderService, name: &str, json: bool) -> Result<()> {
    let restored = svc.restore_product(name)?;

    if json {
        println!("{}", serde_json::json!({ "name": name, "restored": restored }));
        return Ok(());
    }
    if restored {
        println!("Lifted deletion of {name}. Run `larder recover` to bring it back from the ledger.");
        Ok(())
    } else {
        eprintln!("{name} is not marked as deleted");
        process::exit(2);
    }
}

pub(crate) fn cmd_favorite(svc: &mut LarderService, product: &str, json: bool) -> Result<()> {
    let now_favorite = svc.toggle_favorite(product)?;
    let name = svc.get_product(product)?.name;

    if json {
        println!("{}", serde_json::json!({ "product": name, "favorite": now_favorite }));
    } else if now_favorite {
        println!("★ {name} added to favorites");
    } else {
        println!("{name} removed from favorites");
    }
    Ok(())
}

pub(crate) fn cmd_popular(svc: &mut LarderService, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date, svc.today())?;
    let products = svc.popular_products(date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&products)?);
        return Ok(());
    }
    if products.is_empty() {
        eprintln!("Nothing logged in the 30 days before {date}");
        process::exit(2);
    }
    print_product_table(&products, &svc.favorites()?);
    Ok(())
}
