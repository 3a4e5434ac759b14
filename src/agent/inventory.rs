//! 背包与装备管理（免费动作）
//!
//! 每 tick 在决策前执行一次，每个改变背包的动作之后都重新拉取状态：
//! 1. 持有地图就立即使用
//! 2. 背包超过 8 件时丢弃最不重要的一件
//! 3. 有空位且本区域有更强武器：拾取，服务端未自动装备则手动装备
//! 4. 仍有空位：依次拾取货币、回复品，每次一个往返
//! 5. 背包中最强武器未装备且强于当前装备：装备
//!
//! 容量固定为 10，满员时绝不拾取。

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use crate::api::{Action, GameClient, Item, ItemCategory, RequestError, Snapshot};

pub const INVENTORY_CAPACITY: usize = 10;
/// 超过该数量开始丢弃
pub const DROP_ABOVE: usize = 8;

/// 免费动作链的执行上下文
pub struct FreeActionContext<'a> {
    pub client: &'a dyn GameClient,
    pub game_id: &'a str,
    pub agent_id: &'a str,
    pub cancel: &'a CancellationToken,
    pub max_actions: usize,
}

/// 一次免费动作阶段的结果：最新快照与成功执行的动作
#[derive(Debug)]
pub struct FreeActionReport {
    pub snapshot: Snapshot,
    pub performed: Vec<Action>,
}

/// 持有的地图道具
pub fn map_item(snapshot: &Snapshot) -> Option<&Item> {
    snapshot.me.inventory.iter().find(|i| i.is_map())
}

/// 应当丢弃的物品：回复品、货币、已装备、不弱于当前装备的武器都不丢；
/// 可丢的武器中丢最弱的，否则丢任意一件非武器
pub fn drop_candidate(snapshot: &Snapshot) -> Option<&Item> {
    let equipped_power = snapshot.equipped_power();
    let eligible: Vec<&Item> = snapshot
        .me
        .inventory
        .iter()
        .filter(|i| !matches!(i.category, ItemCategory::Recovery | ItemCategory::Currency))
        .filter(|i| !snapshot.is_equipped(&i.id))
        .filter(|i| !(i.is_weapon() && i.power() >= equipped_power))
        .collect();

    eligible
        .iter()
        .copied()
        .filter(|i| i.is_weapon())
        .min_by(|a, b| a.power().total_cmp(&b.power()))
        .or_else(|| eligible.iter().copied().find(|i| !i.is_weapon()))
}

/// 本区域地面上严格强于当前装备的最强武器
pub fn weapon_upgrade_here(snapshot: &Snapshot) -> Option<&Item> {
    let equipped_power = snapshot.equipped_power();
    snapshot
        .items_here()
        .filter(|i| i.is_weapon() && i.power() > equipped_power)
        .max_by(|a, b| a.power().total_cmp(&b.power()))
}

/// 背包中值得装备的武器：未装备，且强于当前装备（或当前无装备）
pub fn weapon_to_equip(snapshot: &Snapshot) -> Option<&Item> {
    let best = snapshot
        .me
        .inventory
        .iter()
        .filter(|i| i.is_weapon())
        .max_by(|a, b| a.power().total_cmp(&b.power()))?;
    if snapshot.is_equipped(&best.id) {
        return None;
    }
    match snapshot.equipped_weapon() {
        None => Some(best),
        Some(current) if best.power() > current.power() => Some(best),
        Some(_) => None,
    }
}

fn has_room(snapshot: &Snapshot) -> bool {
    snapshot.me.inventory.len() < INVENTORY_CAPACITY
}

/// 免费动作链：提交、刷新、计数
struct Chain<'a, 'b> {
    ctx: &'b FreeActionContext<'a>,
    snapshot: Snapshot,
    performed: Vec<Action>,
    remaining: usize,
}

impl Chain<'_, '_> {
    fn can_act(&self) -> bool {
        self.remaining > 0 && !self.ctx.cancel.is_cancelled()
    }

    /// 提交一个免费动作；成功后刷新快照。被拒绝返回 Ok(false)，刷新失败才返回错误
    async fn submit(&mut self, action: Action, why: &str) -> Result<bool, RequestError> {
        if !self.can_act() {
            return Ok(false);
        }
        self.remaining -= 1;
        let ctx = self.ctx;
        match ctx
            .client
            .submit_action(ctx.game_id, ctx.agent_id, &action, Some(why))
            .await
        {
            Ok(_) => {
                tracing::debug!(action = action.kind(), "Free action: {}", why);
                self.performed.push(action);
                self.snapshot = ctx.client.agent_state(ctx.game_id, ctx.agent_id).await?;
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(action = action.kind(), "Free action rejected: {}", e);
                Ok(false)
            }
        }
    }
}

/// 执行本 tick 的免费动作阶段
pub async fn run_free_actions(
    ctx: &FreeActionContext<'_>,
    snapshot: Snapshot,
) -> Result<FreeActionReport, RequestError> {
    let mut chain = Chain {
        ctx,
        snapshot,
        performed: Vec::new(),
        remaining: ctx.max_actions,
    };

    if let Some(map) = map_item(&chain.snapshot).map(|i| i.id.clone()) {
        chain
            .submit(Action::UseItem { item_id: map }, "Reading map to reveal deathzones")
            .await?;
    }

    // 每个 tick 至多丢弃一件
    if chain.snapshot.me.inventory.len() > DROP_ABOVE && chain.can_act() {
        if let Some(item) = drop_candidate(&chain.snapshot).map(|i| i.id.clone()) {
            chain
                .submit(Action::Drop { item_id: item }, "Inventory nearly full, dropping junk")
                .await?;
        }
    }

    if has_room(&chain.snapshot) {
        if let Some(weapon) = weapon_upgrade_here(&chain.snapshot).map(|i| i.id.clone()) {
            let picked = chain
                .submit(
                    Action::Pickup { item_id: weapon.clone() },
                    "Picking up a stronger weapon",
                )
                .await?;
            let held = chain.snapshot.me.inventory.iter().any(|i| i.id == weapon);
            if picked && held && !chain.snapshot.is_equipped(&weapon) {
                chain
                    .submit(Action::Equip { item_id: weapon }, "Equipping the new weapon")
                    .await?;
            }
        }
    }

    let mut attempted: HashSet<String> = HashSet::new();
    for (category, why) in [
        (ItemCategory::Currency, "Collecting currency"),
        (ItemCategory::Recovery, "Collecting recovery item"),
    ] {
        while has_room(&chain.snapshot) && chain.can_act() {
            let Some(item) = chain
                .snapshot
                .items_here()
                .find(|i| i.category == category && !attempted.contains(&i.id))
                .map(|i| i.id.clone())
            else {
                break;
            };
            attempted.insert(item.clone());
            chain.submit(Action::Pickup { item_id: item }, why).await?;
        }
    }

    if let Some(weapon) = weapon_to_equip(&chain.snapshot).map(|i| i.id.clone()) {
        chain
            .submit(Action::Equip { item_id: weapon }, "Equipping best weapon")
            .await?;
    }

    Ok(FreeActionReport {
        snapshot: chain.snapshot,
        performed: chain.performed,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::api::types::{GameState, GameStatus, GameSummary, Registration, VisibleItem};

    fn item(id: &str, category: ItemCategory, power: Option<f64>) -> Item {
        Item {
            id: id.into(),
            name: id.into(),
            category,
            atk_bonus: power,
            ..Item::default()
        }
    }

    fn snapshot(inventory: Vec<Item>, ground: Vec<Item>) -> Snapshot {
        let mut snapshot: Snapshot = serde_json::from_value(json!({
            "self": {"id": "me", "hp": 100, "ep": 10, "regionId": "r1"},
            "currentRegion": {"id": "r1", "connections": ["r2"]},
        }))
        .unwrap();
        snapshot.me.inventory = inventory;
        snapshot.visible_items = ground
            .into_iter()
            .map(|item| VisibleItem {
                region_id: "r1".into(),
                item,
            })
            .collect();
        snapshot
    }

    /// 简易服务端：真实地把拾取/丢弃/装备应用到快照上
    struct SimServer {
        state: Mutex<Snapshot>,
        auto_equip: bool,
        reject_pickups: bool,
        submitted: Mutex<Vec<Action>>,
    }

    impl SimServer {
        fn new(state: Snapshot) -> Self {
            Self {
                state: Mutex::new(state),
                auto_equip: false,
                reject_pickups: false,
                submitted: Mutex::new(Vec::new()),
            }
        }

        fn submitted(&self) -> Vec<Action> {
            self.submitted.lock().unwrap().clone()
        }
    }

    fn rejected() -> RequestError {
        RequestError::Rejected {
            status: 400,
            body: json!({"success": false}),
        }
    }

    #[async_trait]
    impl GameClient for SimServer {
        async fn list_games(&self, _: GameStatus) -> Result<Vec<GameSummary>, RequestError> {
            Ok(Vec::new())
        }

        async fn register(&self, _: &str, _: &str) -> Result<Registration, RequestError> {
            Err(rejected())
        }

        async fn game_state(&self, _: &str) -> Result<GameState, RequestError> {
            Err(rejected())
        }

        async fn agent_state(&self, _: &str, _: &str) -> Result<Snapshot, RequestError> {
            Ok(self.state.lock().unwrap().clone())
        }

        async fn submit_action(
            &self,
            _: &str,
            _: &str,
            action: &Action,
            _: Option<&str>,
        ) -> Result<Value, RequestError> {
            self.submitted.lock().unwrap().push(action.clone());
            let mut state = self.state.lock().unwrap();
            match action {
                Action::Pickup { item_id } => {
                    if self.reject_pickups || state.me.inventory.len() >= INVENTORY_CAPACITY {
                        return Err(rejected());
                    }
                    let pos = state
                        .visible_items
                        .iter()
                        .position(|v| &v.item.id == item_id)
                        .ok_or_else(rejected)?;
                    let mut picked = state.visible_items.remove(pos).item;
                    if self.auto_equip && picked.is_weapon() {
                        picked.is_equipped = true;
                        state.me.equipped_weapon = Some(picked.clone());
                    }
                    state.me.inventory.push(picked);
                }
                Action::Drop { item_id } => {
                    state.me.inventory.retain(|i| &i.id != item_id);
                }
                Action::Equip { item_id } => {
                    let weapon = state
                        .me
                        .inventory
                        .iter()
                        .find(|i| &i.id == item_id)
                        .cloned()
                        .ok_or_else(rejected)?;
                    for i in state.me.inventory.iter_mut() {
                        i.is_equipped = &i.id == item_id;
                    }
                    state.me.equipped_weapon = Some(weapon);
                }
                Action::UseItem { item_id } => {
                    state.me.inventory.retain(|i| &i.id != item_id);
                }
                _ => {}
            }
            Ok(json!({"success": true}))
        }
    }

    async fn run(server: &SimServer) -> FreeActionReport {
        let cancel = CancellationToken::new();
        let ctx = FreeActionContext {
            client: server,
            game_id: "g1",
            agent_id: "me",
            cancel: &cancel,
            max_actions: 8,
        };
        let initial = server.state.lock().unwrap().clone();
        run_free_actions(&ctx, initial).await.unwrap()
    }

    #[test]
    fn test_drop_candidate_prefers_weakest_weaker_weapon() {
        let mut snap = snapshot(
            vec![
                item("sword", ItemCategory::Weapon, Some(10.0)),
                item("dagger", ItemCategory::Weapon, Some(3.0)),
                item("stick", ItemCategory::Weapon, Some(1.0)),
                item("rock", ItemCategory::Other, None),
                item("bandage", ItemCategory::Recovery, None),
            ],
            vec![],
        );
        snap.me.equipped_weapon = Some(item("sword", ItemCategory::Weapon, Some(10.0)));
        assert_eq!(drop_candidate(&snap).unwrap().id, "stick");

        snap.me.inventory.retain(|i| i.id != "stick" && i.id != "dagger");
        assert_eq!(drop_candidate(&snap).unwrap().id, "rock");

        snap.me.inventory.retain(|i| i.id != "rock");
        assert!(drop_candidate(&snap).is_none());
    }

    #[test]
    fn test_weapon_to_equip_requires_strict_upgrade() {
        let mut snap = snapshot(vec![item("axe", ItemCategory::Weapon, Some(5.0))], vec![]);
        assert_eq!(weapon_to_equip(&snap).unwrap().id, "axe");
        snap.me.equipped_weapon = Some(item("club", ItemCategory::Weapon, Some(5.0)));
        assert!(weapon_to_equip(&snap).is_none());
    }

    #[tokio::test]
    async fn test_map_is_used_first() {
        let mut map = item("m1", ItemCategory::Other, None);
        map.type_id = Some("map".into());
        let server = SimServer::new(snapshot(vec![map], vec![]));
        let report = run(&server).await;
        assert_eq!(
            server.submitted().first(),
            Some(&Action::UseItem { item_id: "m1".into() })
        );
        assert!(report.snapshot.me.inventory.is_empty());
    }

    #[tokio::test]
    async fn test_stronger_weapon_is_picked_and_equipped() {
        let mut start = snapshot(
            vec![item("knife", ItemCategory::Weapon, Some(2.0))],
            vec![item("katana", ItemCategory::Weapon, Some(9.0))],
        );
        start.me.equipped_weapon = Some(item("knife", ItemCategory::Weapon, Some(2.0)));
        let server = SimServer::new(start);
        let report = run(&server).await;
        assert_eq!(
            server.submitted(),
            vec![
                Action::Pickup { item_id: "katana".into() },
                Action::Equip { item_id: "katana".into() },
            ]
        );
        assert_eq!(report.snapshot.equipped_weapon().unwrap().id, "katana");
    }

    #[tokio::test]
    async fn test_auto_equipped_weapon_is_not_equipped_twice() {
        let server = SimServer {
            auto_equip: true,
            ..SimServer::new(snapshot(vec![], vec![item("bow", ItemCategory::Weapon, Some(4.0))]))
        };
        run(&server).await;
        assert_eq!(
            server.submitted(),
            vec![Action::Pickup { item_id: "bow".into() }]
        );
    }

    #[tokio::test]
    async fn test_collects_currency_before_recovery() {
        let server = SimServer::new(snapshot(
            vec![],
            vec![
                item("herb", ItemCategory::Recovery, None),
                item("coin", ItemCategory::Currency, None),
            ],
        ));
        run(&server).await;
        assert_eq!(
            server.submitted(),
            vec![
                Action::Pickup { item_id: "coin".into() },
                Action::Pickup { item_id: "herb".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_inventory_never_exceeds_capacity() {
        let inventory: Vec<Item> = (0..8)
            .map(|n| item(&format!("bandage{n}"), ItemCategory::Recovery, None))
            .collect();
        let ground: Vec<Item> = (0..6)
            .map(|n| item(&format!("coin{n}"), ItemCategory::Currency, None))
            .collect();
        let server = SimServer::new(snapshot(inventory, ground));
        let report = run(&server).await;

        assert_eq!(report.snapshot.me.inventory.len(), INVENTORY_CAPACITY);
        let pickups = server
            .submitted()
            .iter()
            .filter(|a| matches!(a, Action::Pickup { .. }))
            .count();
        assert_eq!(pickups, 2);
    }

    #[tokio::test]
    async fn test_full_inventory_never_attempts_pickup() {
        let inventory: Vec<Item> = (0..10)
            .map(|n| item(&format!("coin{n}"), ItemCategory::Currency, None))
            .collect();
        let server = SimServer::new(snapshot(
            inventory,
            vec![
                item("coin-x", ItemCategory::Currency, None),
                item("blade", ItemCategory::Weapon, Some(50.0)),
            ],
        ));
        run(&server).await;
        assert!(server
            .submitted()
            .iter()
            .all(|a| !matches!(a, Action::Pickup { .. })));
    }

    #[tokio::test]
    async fn test_overfull_inventory_drops_one_item_per_tick() {
        let mut inventory: Vec<Item> = (0..7)
            .map(|n| item(&format!("coin{n}"), ItemCategory::Currency, None))
            .collect();
        inventory.push(item("rock", ItemCategory::Other, None));
        inventory.push(item("shell", ItemCategory::Other, None));
        inventory.push(item("twig", ItemCategory::Other, None));
        let server = SimServer::new(snapshot(inventory, vec![]));
        let report = run(&server).await;
        assert_eq!(report.snapshot.me.inventory.len(), 9);
        let submitted = server.submitted();
        assert_eq!(submitted.len(), 1);
        assert!(matches!(&submitted[0], Action::Drop { item_id } if !item_id.starts_with("coin")));
    }

    #[tokio::test]
    async fn test_rejected_pickups_are_not_retried() {
        let server = SimServer {
            reject_pickups: true,
            ..SimServer::new(snapshot(
                vec![],
                vec![
                    item("coin", ItemCategory::Currency, None),
                    item("herb", ItemCategory::Recovery, None),
                ],
            ))
        };
        let report = run(&server).await;
        assert_eq!(server.submitted().len(), 2);
        assert!(report.performed.is_empty());
    }

    #[tokio::test]
    async fn test_stop_halts_free_actions() {
        let server = SimServer::new(snapshot(
            vec![],
            vec![item("coin", ItemCategory::Currency, None)],
        ));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = FreeActionContext {
            client: &server,
            game_id: "g1",
            agent_id: "me",
            cancel: &cancel,
            max_actions: 8,
        };
        let initial = server.state.lock().unwrap().clone();
        run_free_actions(&ctx, initial).await.unwrap();
        assert!(server.submitted().is_empty());
    }
}
