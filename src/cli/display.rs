use colored::*;
use prettytable::{cell, row, Row};

use super::table::ToRow;
use crate::api::rpc::{HistoryView, RouteView};
use crate::utils::{maybe_string, EMPTY_VALUE};

pub struct RouteRow(pub RouteView);

impl ToRow for RouteRow {
    fn columns() -> Row {
        row!["Prefix", "Next Hop", "Originator", "State", "Host Route"]
    }

    fn to_row(&self) -> Row {
        let route = &self.0;
        let state = if route.is_withdrawn {
            "Withdrawn".red()
        } else if route.is_local {
            "Local".yellow()
        } else if route.installed {
            "Installed".green()
        } else {
            "No next hop".red()
        };
        row![
            route.prefix,
            maybe_string(route.next_hop.as_ref()),
            maybe_string(route.originator_id.as_ref()),
            state,
            if route.is_host_route { "yes" } else { EMPTY_VALUE },
        ]
    }
}

pub struct HistoryRow(pub HistoryView);

impl ToRow for HistoryRow {
    fn columns() -> Row {
        row!["Prefix", "Next Hop", "Originator", "Age"]
    }

    fn to_row(&self) -> Row {
        let learned = &self.0;
        row![
            learned.prefix,
            maybe_string(learned.next_hop.as_ref()),
            maybe_string(learned.originator_id.as_ref()),
            learned.age,
        ]
    }
}
