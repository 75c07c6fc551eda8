mod common;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use algo_options_core::{Contract, IronflyConfig, LegRole, OptionType, Side};
use algo_options_strategy::{
    EntryOutcome, ExitReason, IronflyState, IronflyStrategy, JsonStateStore, MarketSnapshot, OptionStrategy,
    TimingFlags,
};

use common::*;

fn next_weekly() -> Vec<Contract> {
    chain(
        "N",
        expiry(NEXT_WEEKLY),
        &[
            (dec!(20800), dec!(40)),
            (dec!(20900), dec!(70)),
            (dec!(21000), dec!(120)),
            (dec!(21100), dec!(170)),
            (dec!(21200), dec!(240)),
        ],
    )
}

fn monthly() -> Vec<Contract> {
    chain("M", expiry(MONTHLY), &[(dec!(20900), dec!(210)), (dec!(21100), dec!(300))])
}

fn market(now_hm: (u32, u32), spot: Decimal, flags: TimingFlags) -> MarketSnapshot {
    snapshot(at(date(2026, 1, 8), now_hm.0, now_hm.1), spot, Vec::new(), next_weekly(), monthly(), flags)
}

fn strategy(h: &Harness) -> IronflyStrategy {
    IronflyStrategy::new(
        "WeeklyIronfly",
        IronflyConfig::default(),
        h.ctx.clone(),
        Box::new(JsonStateStore::new(h.state_path("WeeklyIronfly"))),
    )
    .unwrap()
}

/// Fly around 21000 filled at the chain prices.
fn fly_state() -> IronflyState {
    let chain = next_weekly();
    let pick = |strike| MarketSnapshot::find_strike(&chain, strike, OptionType::Put).unwrap();
    IronflyState {
        legs: vec![
            leg(pick(dec!(21200)), Side::Buy, 75, LegRole::FlyUpper, dec!(240)),
            leg(pick(dec!(21000)), Side::Sell, 150, LegRole::FlyBody, dec!(120)),
            leg(pick(dec!(20800)), Side::Buy, 75, LegRole::FlyLower, dec!(40)),
        ],
        ..IronflyState::default()
    }
}

fn entry_flags() -> TimingFlags {
    TimingFlags {
        can_enter_new_cycle: true,
        ..TimingFlags::default()
    }
}

#[tokio::test]
async fn entry_builds_fly_around_nearest_strike() {
    let h = Harness::new(&[]);
    let mut fly = strategy(&h);

    fly.on_tick(&market((10, 15), dec!(21010), entry_flags())).await.unwrap();

    let orders = h.executor.orders();
    assert_eq!(orders.len(), 3);
    assert_eq!(
        orders
            .iter()
            .map(|o| (o.instrument_id.clone(), o.side, o.quantity))
            .collect::<Vec<_>>(),
        vec![
            (key("N", dec!(21200)), Side::Buy, 75),
            (key("N", dec!(21000)), Side::Sell, 150),
            (key("N", dec!(20800)), Side::Buy, 75),
        ]
    );
    assert_eq!(fly.state().legs.len(), 3);
    assert!(!fly.state().adjusted);
}

#[tokio::test]
async fn missing_wing_places_no_orders() {
    let h = Harness::new(&[]);
    let mut fly = strategy(&h);
    let partial: Vec<Contract> = next_weekly()
        .into_iter()
        .filter(|c| c.strike != dec!(20800))
        .collect();
    let snap = snapshot(at(date(2026, 1, 8), 10, 15), dec!(21000), Vec::new(), partial, monthly(), entry_flags());

    assert_eq!(fly.enter(&snap).await.unwrap(), EntryOutcome::Skipped);
    assert!(h.executor.orders().is_empty());
    assert!(fly.is_flat());
}

#[tokio::test]
async fn entry_waits_for_entry_time() {
    let h = Harness::new(&[]);
    let mut fly = strategy(&h);

    fly.on_tick(&market((9, 15), dec!(21000), entry_flags())).await.unwrap();
    assert!(h.executor.orders().is_empty());
}

#[tokio::test]
async fn broken_entry_flattens_filled_legs() {
    let h = Harness::new(&[]);
    let mut fly = strategy(&h);
    h.executor.fill(dec!(240));
    h.executor.reject("margin shortfall");

    let outcome = fly.enter(&market((10, 15), dec!(21000), entry_flags())).await.unwrap();
    assert_eq!(outcome, EntryOutcome::Flattened);

    let orders = h.executor.orders();
    assert_eq!(orders.len(), 3);
    assert_eq!(orders[2].instrument_id, key("N", dec!(21200)));
    assert_eq!(orders[2].side, Side::Sell);
    assert_eq!(orders[2].tag, "EMERGENCY_EXIT");
    assert!(fly.is_flat());
    assert_eq!(h.closing_rows(), 1);
}

#[tokio::test]
async fn overlay_added_once_then_stop_loss_applies() {
    let h = Harness::new(&[]);
    let mut fly = strategy(&h);
    fly.set_state(fly_state());

    let flags = TimingFlags {
        can_adjust: true,
        ..TimingFlags::default()
    };
    let mut snap = market((10, 15), dec!(20950), flags);
    // body marked up 20 points: -3000 on 200000 capital
    quote(&mut snap, &key("N", dec!(21000)), dec!(140));

    fly.on_tick(&snap).await.unwrap();
    let orders = h.executor.orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].instrument_id, key("N", dec!(20900)));
    assert_eq!(orders[0].side, Side::Sell);
    assert_eq!(orders[0].tag, "FLY_ADJ_NEAR");
    assert_eq!(orders[1].instrument_id, key("M", dec!(20900)));
    assert_eq!(orders[1].side, Side::Buy);
    assert!(fly.state().adjusted);
    assert_eq!(fly.state().legs.len(), 5);

    fly.on_tick(&snap).await.unwrap();
    assert_eq!(h.executor.orders().len(), 2);

    quote(&mut snap, &key("N", dec!(21000)), dec!(150));
    fly.on_tick(&snap).await.unwrap();
    let orders = h.executor.orders();
    assert_eq!(orders.len(), 7);
    assert!(orders[2..].iter().all(|o| o.tag == "EXIT_STOP_LOSS"));
    assert!(fly.is_flat());
    assert!(!fly.state().adjusted);
    assert_eq!(h.closed_pnl(), dec!(-4500));
}

#[tokio::test]
async fn stop_loss_ignored_before_adjustment() {
    let h = Harness::new(&[]);
    let mut fly = strategy(&h);
    fly.set_state(fly_state());

    let mut snap = market((10, 16), dec!(20950), TimingFlags::default());
    quote(&mut snap, &key("N", dec!(21000)), dec!(150));

    fly.on_tick(&snap).await.unwrap();
    assert!(h.executor.orders().is_empty());
    assert_eq!(fly.pnl_pct(&snap.quotes), Some(dec!(-2.25)));
}

#[tokio::test]
async fn profit_target_closes_unadjusted_fly() {
    let h = Harness::new(&[]);
    let mut fly = strategy(&h);
    fly.set_state(fly_state());

    let mut snap = market((11, 0), dec!(21000), TimingFlags::default());
    quote(&mut snap, &key("N", dec!(21000)), dec!(100));

    fly.on_tick(&snap).await.unwrap();
    let orders = h.executor.orders();
    assert_eq!(orders.len(), 3);
    assert!(orders.iter().all(|o| o.tag == "EXIT_PROFIT_TARGET"));
    assert_eq!(h.closed_pnl(), dec!(3000));
}

#[tokio::test]
async fn squares_off_on_expiry_day() {
    let h = Harness::new(&[]);
    let mut fly = strategy(&h);
    fly.set_state(fly_state());

    let snap = snapshot(
        at(expiry(NEXT_WEEKLY), 10, 0),
        dec!(21000),
        next_weekly(),
        Vec::new(),
        monthly(),
        TimingFlags::default(),
    );
    fly.on_tick(&snap).await.unwrap();

    let orders = h.executor.orders();
    assert_eq!(orders.len(), 3);
    assert!(orders.iter().all(|o| o.tag == "EXIT_EXPIRY_DAY"));
    assert!(fly.is_flat());
}

#[tokio::test]
async fn closed_legs_leave_state_even_without_a_usable_delta() {
    let h = Harness::new(&[]);
    let mut fly = strategy(&h);
    let mut state = fly_state();
    for leg in &mut state.legs {
        leg.delta = f64::NAN;
    }
    fly.set_state(state);

    let snap = market((12, 0), dec!(21000), TimingFlags::default());
    let flat = fly.exit_all(ExitReason::Manual, &snap.quotes, snap.now).await.unwrap();

    assert!(flat);
    assert!(fly.is_flat());
    assert!(fly.state().exit_pending.is_none());
    assert_eq!(h.executor.orders().len(), 3);
}
